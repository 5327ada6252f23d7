//! Session membership for live auctions.

use gavel_types::{
    AuctionParticipant, AuctionSession, Caller, ParticipantStatus, SessionId, UserId,
};
use tracing::{debug, info};

use crate::engine::{load_auction, AuctionEngine};
use crate::error::{AuctionError, AuctionResult};
use crate::store::{Guard, Key, Record, StoreExt, WriteSet};

impl AuctionEngine {
    /// Join (or rejoin) the session identified by `session_code`.
    pub async fn join_session(
        &self,
        caller: &Caller,
        session_code: &str,
        invite_code: Option<&str>,
    ) -> AuctionResult<AuctionParticipant> {
        let now = self.now();
        let code = session_code.trim().to_ascii_uppercase();
        let session_id = self
            .store()
            .scan_records::<AuctionSession>(|session| session.session_code == code)?
            .into_iter()
            .next()
            .map(|doc| doc.value.id)
            .ok_or_else(|| AuctionError::not_found("session", &code))?;

        let participant = self.mutator.run(|txn| {
            let session: AuctionSession = txn.require(&Key::Session(session_id), session_id)?;
            if session.status.is_terminal() {
                return Err(AuctionError::Expired(format!(
                    "session is {}",
                    session.status.as_str()
                )));
            }
            let auction = load_auction(txn, session.auction_id)?;
            if !auction.invite_matches(invite_code) {
                return Err(AuctionError::Forbidden("invalid invite code".to_string()));
            }

            let key = Key::Participant(session_id, caller.user_id);
            let participant = match txn.get::<AuctionParticipant>(&key)? {
                Some(existing) if existing.status == ParticipantStatus::Banned => {
                    return Err(AuctionError::Forbidden(
                        "banned from this session".to_string(),
                    ))
                }
                Some(mut existing) => {
                    existing.status = ParticipantStatus::Active;
                    existing.last_activity = now;
                    txn.put(existing.clone())?;
                    existing
                }
                None => {
                    let joined = AuctionParticipant {
                        session_id,
                        user_id: caller.user_id,
                        status: ParticipantStatus::Active,
                        joined_at: now,
                        last_activity: now,
                    };
                    txn.insert(joined.clone());
                    joined
                }
            };
            Ok(participant)
        })?;
        debug!(session = %session_id, user = %caller.user_id, "participant joined");
        Ok(participant)
    }

    pub async fn leave_session(
        &self,
        caller: &Caller,
        session_id: SessionId,
    ) -> AuctionResult<AuctionParticipant> {
        let now = self.now();
        self.mutator.run(|txn| {
            let key = Key::Participant(session_id, caller.user_id);
            let mut participant: AuctionParticipant = txn.require(&key, key.to_string())?;
            if participant.status == ParticipantStatus::Active {
                participant.status = ParticipantStatus::Left;
                participant.last_activity = now;
                txn.put(participant.clone())?;
            }
            Ok(participant)
        })
    }

    /// Ban `user` from a session. Organizer only; a banned user cannot
    /// rejoin or bid.
    pub async fn ban_participant(
        &self,
        caller: &Caller,
        session_id: SessionId,
        user: UserId,
    ) -> AuctionResult<AuctionParticipant> {
        let participant = self.mutator.run(|txn| {
            let session: AuctionSession = txn.require(&Key::Session(session_id), session_id)?;
            let auction = load_auction(txn, session.auction_id)?;
            if !caller.may_manage(&auction) {
                return Err(AuctionError::Forbidden(
                    "only the organizer can ban participants".to_string(),
                ));
            }
            let key = Key::Participant(session_id, user);
            let mut participant: AuctionParticipant = txn.require(&key, key.to_string())?;
            participant.status = ParticipantStatus::Banned;
            txn.put(participant.clone())?;
            Ok(participant)
        })?;
        info!(session = %session_id, user = %user, "participant banned");
        Ok(participant)
    }

    /// Record activity for a participant. Best effort: the update is dropped
    /// if the record changed since it was read.
    pub fn touch_participant(&self, session_id: SessionId, user: UserId) -> AuctionResult<()> {
        let key = Key::Participant(session_id, user);
        let Some(current) = self.store().fetch::<AuctionParticipant>(&key)? else {
            return Ok(());
        };
        if current.value.status != ParticipantStatus::Active {
            return Ok(());
        }
        let mut participant = current.value;
        participant.last_activity = self.now();
        let writes = WriteSet {
            guards: vec![Guard {
                key,
                expected: Some(current.version),
            }],
            writes: vec![participant.into_document()],
        };
        if let Err(err) = self.store().commit(writes) {
            debug!(session = %session_id, user = %user, "activity update dropped: {err}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AuctionError;
    use crate::mocks::TestHarness;
    use gavel_types::{Caller, ParticipantStatus, SessionStatus, UserId};

    #[tokio::test]
    async fn join_leave_and_rejoin() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(10);
        let created = harness.live_auction(&organizer, &[item], 0, 1).await;
        let session = created.session.unwrap();
        let user = Caller::user(UserId::new());

        let joined = harness
            .engine
            .join_session(&user, &session.session_code.to_lowercase(), None)
            .await
            .unwrap();
        assert_eq!(joined.status, ParticipantStatus::Active);

        let left = harness.engine.leave_session(&user, session.id).await.unwrap();
        assert_eq!(left.status, ParticipantStatus::Left);

        harness.clock.advance(500);
        let rejoined = harness
            .engine
            .join_session(&user, &session.session_code, None)
            .await
            .unwrap();
        assert_eq!(rejoined.status, ParticipantStatus::Active);
        assert_eq!(rejoined.joined_at, joined.joined_at);
        assert_eq!(rejoined.last_activity, joined.joined_at + 500);
    }

    #[tokio::test]
    async fn banned_users_cannot_rejoin() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(10);
        let created = harness.live_auction(&organizer, &[item], 0, 1).await;
        let session = created.session.unwrap();
        let user = Caller::user(UserId::new());
        harness
            .engine
            .join_session(&user, &session.session_code, None)
            .await
            .unwrap();

        assert!(matches!(
            harness.engine.ban_participant(&user, session.id, user.user_id).await,
            Err(AuctionError::Forbidden(_))
        ));
        harness
            .engine
            .ban_participant(&organizer, session.id, user.user_id)
            .await
            .unwrap();
        let err = harness
            .engine
            .join_session(&user, &session.session_code, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Forbidden(_)));
    }

    #[tokio::test]
    async fn invite_only_sessions_check_the_code() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(10);
        let now = harness.clock.now_ms();
        let mut request = crate::mocks::new_auction(
            now,
            now + crate::mocks::HOUR,
            gavel_types::AuctionSettings::Live(gavel_types::LiveSettings {
                item_ids: vec![item.id],
                current_item_id: None,
                reserve_price: 0,
                min_bid_increment: 1,
            }),
        );
        request.invite_only = true;
        request.invite_code = Some("friends".to_string());
        let created = harness.engine.create_auction(&organizer, request).await.unwrap();
        let code = created.session.unwrap().session_code;
        let user = Caller::user(UserId::new());

        assert!(matches!(
            harness.engine.join_session(&user, &code, Some("strangers")).await,
            Err(AuctionError::Forbidden(_))
        ));
        assert!(harness.engine.join_session(&user, &code, Some("friends")).await.is_ok());
    }

    #[tokio::test]
    async fn ended_sessions_refuse_joins() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(10);
        let created = harness.live_auction(&organizer, &[item], 0, 1).await;
        harness
            .engine
            .cancel_auction(&organizer, created.auction.id)
            .await
            .unwrap();
        let session = harness.session(created.auction.id);
        assert_eq!(session.status, SessionStatus::Cancelled);
        let err = harness
            .engine
            .join_session(&Caller::user(UserId::new()), &session.session_code, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Expired(_)));
    }

    #[tokio::test]
    async fn touch_only_updates_active_participants() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(10);
        let created = harness.live_auction(&organizer, &[item], 0, 1).await;
        let session = created.session.unwrap();
        let user = Caller::user(UserId::new());
        harness
            .engine
            .join_session(&user, &session.session_code, None)
            .await
            .unwrap();

        let now = harness.clock.advance(2_000);
        harness.engine.touch_participant(session.id, user.user_id).unwrap();
        assert_eq!(harness.participant(session.id, user.user_id).last_activity, now);

        harness.engine.leave_session(&user, session.id).await.unwrap();
        harness.clock.advance(2_000);
        harness.engine.touch_participant(session.id, user.user_id).unwrap();
        assert_eq!(harness.participant(session.id, user.user_id).last_activity, now);
    }
}
