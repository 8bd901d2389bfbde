use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use expensa_core::domain::expense::ExpenseId;

/// One async mutex per expense id. Work on different expenses never waits on
/// each other; work on the same expense runs one at a time.
#[derive(Default)]
pub struct ExpenseLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ExpenseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, expense_id: &ExpenseId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Drop slots nobody holds or waits on.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(expense_id.0.clone()).or_default())
        };
        slot.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        match self.slots.lock() {
            Ok(slots) => slots.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
