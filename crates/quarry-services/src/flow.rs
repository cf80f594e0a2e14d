//! Flow control — turns granted credit into bounded reads.
//!
//! Credits are kept on a stack and consumed LIFO: the most recent grant is
//! drawn down first, older grants are only served once newer ones are
//! exhausted. Existing clients meter against this order, so it is kept.
//!
//! The controller is pure bookkeeping. It never touches storage or the
//! network; the session asks it how much to read next and reports back how
//! much was actually sent.

/// Bounds applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowLimits {
    /// Credit substituted for a negative grant.
    pub default_allocation: u64,
    /// Largest single read, whatever the granted credit.
    pub max_read_size: u64,
}

#[derive(Debug, Clone)]
pub struct FlowController {
    target: u64,
    retrieved: u64,
    allocated: u64,
    pending: Vec<u64>,
    limits: FlowLimits,
}

impl FlowController {
    pub fn new(target: u64, limits: FlowLimits) -> Self {
        Self {
            target,
            retrieved: 0,
            allocated: 0,
            pending: Vec::new(),
            limits,
        }
    }

    /// Normalize a requested amount: negative grants get the default.
    pub fn normalize(&self, amount: i64) -> u64 {
        if amount < 0 {
            self.limits.default_allocation
        } else {
            amount as u64
        }
    }

    /// Accept a verified, recorded grant. Returns the credited amount.
    /// A zero grant is counted but leaves the stack untouched.
    pub fn grant(&mut self, amount: i64) -> u64 {
        let credit = self.normalize(amount);
        self.allocated = self.allocated.saturating_add(credit);
        if credit > 0 {
            self.pending.push(credit);
        }
        credit
    }

    /// Size of the next read, or `None` if more credit is needed first
    /// (or the target has been reached).
    pub fn next_chunk(&self) -> Option<u64> {
        if self.is_complete() {
            return None;
        }
        let top = *self.pending.last()?;
        Some(top.min(self.remaining()).min(self.limits.max_read_size.max(1)))
    }

    /// Record `sent` bytes transmitted against the top-of-stack credit.
    pub fn consume(&mut self, sent: u64) {
        let remaining = self.remaining();
        let Some(top) = self.pending.last_mut() else {
            debug_assert!(sent == 0, "bytes sent without credit");
            return;
        };
        debug_assert!(sent <= *top, "chunk exceeds top-of-stack credit");
        let sent = sent.min(*top).min(remaining);
        *top -= sent;
        self.retrieved += sent;
        if *top == 0 {
            self.pending.pop();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.retrieved >= self.target
    }

    pub fn remaining(&self) -> u64 {
        self.target - self.retrieved
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn retrieved(&self) -> u64 {
        self.retrieved
    }

    pub fn allocated(&self) -> u64 {
        self.allocated
    }
}

#[cfg(test)]
impl FlowController {
    /// Remaining amount of the credit that will be drawn next.
    pub fn top_credit(&self) -> u64 {
        self.pending.last().copied().unwrap_or(0)
    }

    /// Unspent credit across the whole stack.
    pub fn pending_credit(&self) -> u64 {
        self.pending.iter().fold(0u64, |acc, c| acc.saturating_add(*c))
    }
}
