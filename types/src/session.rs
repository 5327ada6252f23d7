use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{AuctionId, SessionId, UserId};

/// Length of the code external participants use to join a session.
pub const SESSION_CODE_LEN: usize = 8;

const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

/// Runtime instance of a live auction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionSession {
    pub id: SessionId,
    pub auction_id: AuctionId,
    pub session_code: String,
    pub status: SessionStatus,
    pub scheduled_start_time: u64,
    pub scheduled_end_time: u64,
    pub actual_start_time: Option<u64>,
    pub actual_end_time: Option<u64>,
    /// Bids on the current item are accepted while `now <= bidding_window`.
    pub bidding_window: Option<u64>,
}

impl AuctionSession {
    pub fn new(auction_id: AuctionId, scheduled_start_time: u64, scheduled_end_time: u64) -> Self {
        Self {
            id: SessionId::new(),
            auction_id,
            session_code: generate_session_code(&mut rand::thread_rng()),
            status: SessionStatus::Pending,
            scheduled_start_time,
            scheduled_end_time,
            actual_start_time: None,
            actual_end_time: None,
            bidding_window: None,
        }
    }

    pub fn window_open(&self, now_ms: u64) -> bool {
        self.status == SessionStatus::Active
            && self.bidding_window.is_some_and(|window| now_ms <= window)
    }
}

pub fn generate_session_code<R: Rng>(rng: &mut R) -> String {
    let range = Uniform::from(0..SESSION_CODE_ALPHABET.len());
    (0..SESSION_CODE_LEN)
        .map(|_| SESSION_CODE_ALPHABET[range.sample(rng)] as char)
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Pending,
    Active,
    Left,
    Banned,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Pending => "pending",
            ParticipantStatus::Active => "active",
            ParticipantStatus::Left => "left",
            ParticipantStatus::Banned => "banned",
        }
    }
}

/// One record per (session, user).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionParticipant {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub status: ParticipantStatus,
    pub joined_at: u64,
    pub last_activity: u64,
}
