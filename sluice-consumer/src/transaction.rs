//! Minimal transaction used to stage queue operations.
//!
//! Queues register a [`TransactionOperation`] for each staged acknowledgement
//! or cancellation. Committing runs `after_commit` in registration order;
//! rolling back runs `after_rollback` in reverse order, so operations that
//! push references back onto the head of a queue restore the original order.

use std::fmt;

use anyhow::bail;

/// Deferred work attached to a [`Transaction`].
pub trait TransactionOperation: Send {
    /// Called when the owning transaction commits.
    ///
    /// # Errors
    /// If the staged work cannot be applied
    fn after_commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the owning transaction rolls back.
    ///
    /// # Errors
    /// If the staged work cannot be undone
    fn after_rollback(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

pub struct Transaction {
    id: u64,
    state: TransactionState,
    operations: Vec<Box<dyn TransactionOperation>>,
}

impl Transaction {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            operations: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> TransactionState {
        self.state
    }

    pub fn add_operation(&mut self, operation: impl TransactionOperation + 'static) {
        self.operations.push(Box::new(operation));
    }

    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// # Errors
    ///
    /// Fails if the transaction is no longer active or an operation fails.
    pub fn commit(&mut self) -> anyhow::Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committed;

        for operation in &mut self.operations {
            operation.after_commit()?;
        }
        self.operations.clear();

        Ok(())
    }

    /// # Errors
    ///
    /// Fails if the transaction is no longer active or an operation fails.
    pub fn rollback(&mut self) -> anyhow::Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::RolledBack;

        for operation in self.operations.iter_mut().rev() {
            operation.after_rollback()?;
        }
        self.operations.clear();

        Ok(())
    }

    fn ensure_active(&self) -> anyhow::Result<()> {
        if self.state != TransactionState::Active {
            bail!("Transaction {} is {:?}", self.id, self.state);
        }
        Ok(())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("operations", &self.operations.len())
            .finish()
    }
}
