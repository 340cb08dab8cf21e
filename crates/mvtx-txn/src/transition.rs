//! Status transition table.

use mvtx_types::TxnStatus;

/// Whether a transaction currently in `from` may move to `to`.
///
/// `Committing -> Committing` is accepted so that a commit interrupted by a
/// store shutdown can be resumed after recovery.
#[must_use]
pub const fn is_valid_transition(from: TxnStatus, to: TxnStatus) -> bool {
    use TxnStatus::{Closed, Committed, Committing, Open, Prepared, RolledBack, RollingBack};
    match to {
        Open => matches!(from, Closed | RollingBack),
        RollingBack | Prepared => matches!(from, Open),
        Committing => matches!(from, Open | Prepared | Committing),
        Committed => matches!(from, Committing),
        RolledBack => matches!(from, Open | Prepared),
        Closed => matches!(from, Committing | Committed | RolledBack),
    }
}

/// Statuses from which `to` may be requested.
#[must_use]
pub fn allowed_sources(to: TxnStatus) -> Vec<TxnStatus> {
    TxnStatus::ALL
        .into_iter()
        .filter(|from| is_valid_transition(*from, to))
        .collect()
}
