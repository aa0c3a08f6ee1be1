//! Last-write-wins conflict resolution.

use crate::model::{Event, Side, SyncStatus};
use crate::sync::event_codec::remote_onto_event;
use crate::sync::remote::RemoteEvent;

/// Outcome of comparing a local event with its remote counterpart.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The version to keep, whole.
    pub winner: Event,
    pub winner_side: Side,
    /// Both sides diverged from the baseline; the loser is kept in
    /// `winner.conflict_copy` and the status is `conflict`.
    pub conflict: bool,
    /// Both versions already carry the same content.
    pub unchanged: bool,
}

/// Decide which of `local` and `remote` wins.
///
/// The later of `local.updated_at` and `remote.last_modified` wins wholesale;
/// equal timestamps keep the local version. `baseline` is the version the
/// pending local change was made against (`previous_data` of the local
/// action). When it differs from both current versions, the result is flagged
/// as a conflict rather than resolved silently.
pub fn resolve(local: &Event, remote: &RemoteEvent, baseline: Option<&Event>) -> Resolution {
    let remote_version = remote_onto_event(remote, local);

    if local.same_content(&remote_version) {
        let mut winner = local.clone();
        winner.external_id = Some(remote.remote_id.clone());
        winner.remote_calendar_id = Some(remote.calendar_id.clone());
        return Resolution {
            winner,
            winner_side: Side::Local,
            conflict: false,
            unchanged: true,
        };
    }

    let winner_side = if remote.last_modified > local.updated_at {
        Side::Remote
    } else {
        Side::Local
    };
    let conflict = baseline
        .map(|base| !base.same_content(local) && !base.same_content(&remote_version))
        .unwrap_or(false);

    let (mut winner, loser, loser_side) = match winner_side {
        Side::Remote => (remote_version, local.clone(), Side::Local),
        Side::Local => {
            let mut kept = local.clone();
            kept.external_id = Some(remote.remote_id.clone());
            kept.remote_calendar_id = Some(remote.calendar_id.clone());
            (kept, remote_version, Side::Remote)
        }
    };

    if conflict {
        winner.conflict_copy = Some(loser.to_conflict_copy(loser_side));
        winner.sync_status = SyncStatus::Conflict;
    } else if winner_side == Side::Remote {
        winner.sync_status = SyncStatus::Synced;
        winner.last_sync_error = None;
    }

    Resolution {
        winner,
        winner_side,
        conflict,
        unchanged: false,
    }
}
