//! Diary invitations.
//!
//! ```text
//! invite ──► pending ──accept──► accepted ──revoke──► revoked
//!               │
//!               ├──decline──► declined
//!               └──revoke───► revoked
//! ```
//!
//! Only accepting grants access at the oracle, and only revoking an
//! accepted invitation takes it away. Declined and revoked records are
//! final; inviting again creates a fresh record.

use tracing::info;

use quire_store::{Repositories, StoreError};
use quire_types::{AgentId, DiaryId, Share, ShareId, ShareRole, ShareStatus};

use super::DiaryService;
use crate::error::{DiaryError, Result};
use crate::propagation::PendingPropagation;

impl DiaryService {
    /// Invite `invitee` to a diary the requester manages.
    pub async fn invite(
        &self,
        diary_id: DiaryId,
        requester: &AgentId,
        invitee: &AgentId,
        role: ShareRole,
    ) -> Result<Share> {
        self.authenticate(requester)?;
        self.require_diary_manage(diary_id, requester).await?;
        if invitee == requester {
            return Err(DiaryError::validation("cannot invite yourself"));
        }
        self.require_agent(invitee)?;

        let share = Share::pending(diary_id, *invitee, role);
        self.transact("invite", |tx| {
            if let Some(active) = tx.shares().find_by_diary_and_agent(diary_id, *invitee)? {
                return Err(DiaryError::validation(format!(
                    "agent {invitee} already has a {} invitation",
                    active.status
                )));
            }
            tx.shares().create(&share).map_err(|e| match e {
                StoreError::Duplicate(_) => DiaryError::validation(format!(
                    "agent {invitee} already has an active invitation"
                )),
                other => other.into(),
            })
        })
        .await?;

        info!(
            share_id = %share.id,
            diary_id = %diary_id,
            invitee = %invitee,
            role = %role,
            "Invitation created"
        );
        Ok(share)
    }

    /// Accept a pending invitation addressed to the requester.
    pub async fn accept(&self, share_id: ShareId, requester: &AgentId) -> Result<Share> {
        self.authenticate(requester)?;
        let (share, pending) = self
            .transact("accept_invitation", |tx| {
                let mut share = self.invitation_for(tx, share_id, requester)?;
                self.transition(tx, &mut share, ShareStatus::Accepted)?;
                let pending =
                    self.propagator
                        .grant_role(tx, share.diary_id, share.shared_with, share.role)?;
                Ok((share, pending))
            })
            .await?;
        self.propagator.settle(pending).await;

        info!(
            share_id = %share_id,
            diary_id = %share.diary_id,
            role = %share.role,
            "Invitation accepted"
        );
        Ok(share)
    }

    /// Decline a pending invitation addressed to the requester.
    pub async fn decline(&self, share_id: ShareId, requester: &AgentId) -> Result<Share> {
        self.authenticate(requester)?;
        let share = self
            .transact("decline_invitation", |tx| {
                let mut share = self.invitation_for(tx, share_id, requester)?;
                self.transition(tx, &mut share, ShareStatus::Declined)?;
                Ok(share)
            })
            .await?;

        info!(share_id = %share_id, diary_id = %share.diary_id, "Invitation declined");
        Ok(share)
    }

    /// Revoke a pending or accepted invitation. Access is removed at the
    /// oracle before this returns.
    pub async fn revoke(&self, share_id: ShareId, requester: &AgentId) -> Result<Share> {
        self.authenticate(requester)?;
        let share = self.find_share(share_id)?;
        self.require_diary_manage(share.diary_id, requester).await?;

        let (share, pending) = self
            .transact("revoke_invitation", |tx| self.revoke_in(tx, share_id))
            .await?;
        self.propagator.settle(pending).await;

        info!(share_id = %share_id, diary_id = %share.diary_id, "Invitation revoked");
        Ok(share)
    }

    /// Replace an active invitation with a fresh pending one for `role`.
    ///
    /// The old record is revoked (removing access if it was accepted) and
    /// the invitee has to accept again.
    pub async fn change_role(
        &self,
        share_id: ShareId,
        requester: &AgentId,
        role: ShareRole,
    ) -> Result<Share> {
        self.authenticate(requester)?;
        let current = self.find_share(share_id)?;
        self.require_diary_manage(current.diary_id, requester).await?;
        if current.role == role {
            return Err(DiaryError::validation(format!("invitation already has role {role}")));
        }

        let (share, pending) = self
            .transact("change_role", |tx| {
                let (revoked, pending) = self.revoke_in(tx, share_id)?;
                let share = Share::pending(revoked.diary_id, revoked.shared_with, role);
                tx.shares().create(&share)?;
                Ok((share, pending))
            })
            .await?;
        self.propagator.settle(pending).await;

        info!(
            old_share_id = %share_id,
            share_id = %share.id,
            role = %role,
            "Invitation role changed"
        );
        Ok(share)
    }

    /// Every invitation for a diary the requester manages.
    pub async fn list_shares(&self, diary_id: DiaryId, requester: &AgentId) -> Result<Vec<Share>> {
        self.authenticate(requester)?;
        self.require_diary_manage(diary_id, requester).await?;
        Ok(self.store.read(|c| c.shares().list_by_diary(diary_id))?)
    }

    /// Pending invitations addressed to the requester.
    pub async fn list_pending_invitations(&self, requester: &AgentId) -> Result<Vec<Share>> {
        self.authenticate(requester)?;
        Ok(self
            .store
            .read(|c| c.shares().list_pending_for_agent(*requester))?)
    }

    fn find_share(&self, id: ShareId) -> Result<Share> {
        self.store
            .read(|c| c.shares().find_by_id(id))?
            .ok_or_else(|| DiaryError::not_found(format!("invitation {id}")))
    }

    /// The invitation if it is addressed to `requester`; NotFound otherwise.
    fn invitation_for(
        &self,
        conn: &rusqlite::Connection,
        id: ShareId,
        requester: &AgentId,
    ) -> Result<Share> {
        conn.shares()
            .find_by_id(id)?
            .filter(|s| s.shared_with == *requester)
            .ok_or_else(|| DiaryError::not_found(format!("invitation {id}")))
    }

    fn transition(
        &self,
        conn: &rusqlite::Connection,
        share: &mut Share,
        next: ShareStatus,
    ) -> Result<()> {
        if !share.status.can_transition_to(next) {
            return Err(DiaryError::validation(format!(
                "invitation is {}, cannot become {next}",
                share.status
            )));
        }
        let now = quire_types::now();
        if !conn.shares().update_status(share.id, share.status, next, now)? {
            return Err(DiaryError::validation(format!(
                "invitation {} changed concurrently",
                share.id
            )));
        }
        share.status = next;
        share.updated_at = now;
        Ok(())
    }

    fn revoke_in(
        &self,
        conn: &rusqlite::Connection,
        id: ShareId,
    ) -> Result<(Share, PendingPropagation)> {
        let mut share = conn
            .shares()
            .find_by_id(id)?
            .ok_or_else(|| DiaryError::not_found(format!("invitation {id}")))?;
        let was_accepted = share.status == ShareStatus::Accepted;
        self.transition(conn, &mut share, ShareStatus::Revoked)?;
        let pending = if was_accepted {
            self.propagator
                .remove_diary_relation_for_agent(conn, share.diary_id, share.shared_with)?
        } else {
            PendingPropagation::none()
        };
        Ok((share, pending))
    }
}
