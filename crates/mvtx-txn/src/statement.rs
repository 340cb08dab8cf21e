//! Statement-scoped snapshot pin.

use std::ops::{Deref, DerefMut};

use crate::store::TransactionStore;
use crate::transaction::Transaction;

/// Holds a transaction's statement pin; dropping it ends the statement.
///
/// Created by [`Transaction::statement`]. The pin is released on every exit
/// path of the statement, including early returns through `?` and unwinding.
pub struct StatementGuard<'t, S: TransactionStore> {
    txn: &'t mut Transaction<S>,
}

impl<'t, S: TransactionStore> StatementGuard<'t, S> {
    pub(crate) const fn new(txn: &'t mut Transaction<S>) -> Self {
        Self { txn }
    }
}

impl<S: TransactionStore> Deref for StatementGuard<'_, S> {
    type Target = Transaction<S>;

    fn deref(&self) -> &Transaction<S> {
        self.txn
    }
}

impl<S: TransactionStore> DerefMut for StatementGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut Transaction<S> {
        self.txn
    }
}

impl<S: TransactionStore> Drop for StatementGuard<'_, S> {
    fn drop(&mut self) {
        self.txn.mark_statement_end();
    }
}
