/// Per-second upload budget. Whatever a second's dispatch queued beyond
/// the rate is owed by the following seconds.
#[derive(Debug, Clone)]
pub struct UploadLimiter {
    rate: u64,
    debt: u64,
    last_second: u64,
}

impl UploadLimiter {
    /// The first tick at or after `now` grants one second of budget.
    pub fn new(rate: u64, now: u64) -> Self {
        UploadLimiter {
            rate,
            debt: 0,
            last_second: now.saturating_sub(1),
        }
    }

    pub fn debt(&self) -> u64 {
        self.debt
    }

    /// Runs `queue` once for each second elapsed since the last tick with
    /// that second's remaining budget; `queue` returns the bytes it queued.
    pub fn tick<F>(&mut self, now: u64, mut queue: F)
    where
        F: FnMut(u64) -> u64,
    {
        while self.last_second < now {
            self.last_second += 1;
            if self.debt >= self.rate {
                self.debt -= self.rate;
            } else {
                let queued = queue(self.rate - self.debt);
                self.debt = queued.saturating_sub(self.rate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::server::UploadLimiter;

    #[test]
    fn one_budget_per_second() {
        let mut limiter = UploadLimiter::new(1000, 100);
        let mut budgets = Vec::new();
        limiter.tick(100, |budget| {
            budgets.push(budget);
            0
        });
        limiter.tick(100, |budget| {
            budgets.push(budget);
            0
        });
        limiter.tick(102, |budget| {
            budgets.push(budget);
            budget
        });
        assert_eq!(budgets, vec![1000, 1000, 1000]);
    }

    #[test]
    fn overshoot_becomes_debt() {
        let mut limiter = UploadLimiter::new(1000, 10);
        let mut budgets = Vec::new();
        limiter.tick(10, |budget| {
            budgets.push(budget);
            3500
        });
        assert_eq!(limiter.debt(), 2500);

        // Two seconds are skipped to pay off the debt, the third gets the rest.
        limiter.tick(13, |budget| {
            budgets.push(budget);
            budget
        });
        assert_eq!(budgets, vec![1000, 500]);
        assert_eq!(limiter.debt(), 0);
    }
}
