//! Data model shared by the gavel auction engine and its services.
//!
//! Every timestamp is milliseconds since the Unix epoch. Amounts are whole
//! currency units.

mod auction;
mod bid;
mod events;
mod ids;
mod item;
mod session;

pub use auction::{
    Auction, AuctionSettings, AuctionStatus, BidStats, LiveSettings, Protocol, SealedSettings,
    TimedSettings,
};
pub use bid::Bid;
pub use events::{AuctionEvent, Outcome, Topic};
pub use ids::{AuctionId, BidId, ItemId, SessionId, UserId};
pub use item::{Item, ItemStatus};
pub use session::{
    generate_session_code, AuctionParticipant, AuctionSession, ParticipantStatus, SessionStatus,
    SESSION_CODE_LEN,
};

/// Role of a caller as resolved by the identity directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

/// An already-authenticated caller. The engine only authorizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// Organizer of `auction`, or an admin acting on its behalf.
    pub fn may_manage(&self, auction: &Auction) -> bool {
        self.role == Role::Admin || auction.is_organizer(self.user_id)
    }
}
