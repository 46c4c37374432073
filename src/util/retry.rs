//! オラクル呼び出しの再試行ポリシー。
//!
//! 既定は固定間隔の再試行。指数バックオフを選んだ場合は AWS 推奨の
//! Full Jitter 戦略で待機時間を決める。

use std::{str::FromStr, time::Duration};

use rand::Rng;

/// 待機時間の決め方。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// 毎回 `base_delay_ms` だけ待つ。
    Fixed,
    /// `base * 2^(attempt-1)` を上限でキャップし、0..=その値 からランダムに選ぶ。
    ExponentialJitter,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" | "exponential-jitter" => Ok(Self::ExponentialJitter),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大試行回数（初回を含む）
    pub max_attempts: usize,
    /// ベースとなる遅延時間（ミリ秒）
    pub base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）。指数バックオフ時のみ使用
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 10000,
            strategy: BackoffStrategy::Fixed,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(
        max_attempts: usize,
        base_delay_ms: u64,
        max_delay_ms: u64,
        strategy: BackoffStrategy,
    ) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            strategy,
        }
    }

    /// 固定間隔で再試行するポリシーを作成する。
    #[must_use]
    pub const fn fixed(max_attempts: usize, delay_ms: u64) -> Self {
        Self::new(max_attempts, delay_ms, delay_ms, BackoffStrategy::Fixed)
    }

    /// 待機なしで再試行するポリシー。テストやローカル検証向け。
    #[must_use]
    pub const fn immediate(max_attempts: usize) -> Self {
        Self::fixed(max_attempts, 0)
    }

    /// 失敗回数に対する待機時間を計算する。
    ///
    /// # Arguments
    /// * `attempt` - これまでに失敗した試行回数（0 なら待機なし）
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        match self.strategy {
            BackoffStrategy::Fixed => Duration::from_millis(self.base_delay_ms),
            BackoffStrategy::ExponentialJitter => {
                let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX);
                let exponential_delay = self
                    .base_delay_ms
                    .saturating_mul(1_u64.checked_shl(shift).unwrap_or(u64::MAX));
                let capped_delay = exponential_delay.min(self.max_delay_ms);

                let jittered_delay = if capped_delay > 0 {
                    rand::rng().random_range(0..=capped_delay)
                } else {
                    0
                };

                Duration::from_millis(jittered_delay)
            }
        }
    }

    /// この失敗回数でまだ再試行できるかどうか。
    #[must_use]
    pub const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_for_attempt_zero_is_zero() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(0));
    }

    #[test]
    fn fixed_policy_waits_the_same_every_time() {
        let policy = RetryPolicy::fixed(3, 2000);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(2000));
    }

    #[test]
    fn exponential_delay_stays_within_doubling_window() {
        let policy = RetryPolicy::new(5, 100, 10000, BackoffStrategy::ExponentialJitter);

        assert!(policy.delay_for_attempt(1) <= Duration::from_millis(100));
        assert!(policy.delay_for_attempt(2) <= Duration::from_millis(200));
        assert!(policy.delay_for_attempt(3) <= Duration::from_millis(400));
    }

    #[test]
    fn exponential_delay_respects_cap() {
        let policy = RetryPolicy::new(10, 100, 500, BackoffStrategy::ExponentialJitter);

        assert!(policy.delay_for_attempt(10) <= Duration::from_millis(500));
        assert!(policy.delay_for_attempt(200) <= Duration::from_millis(500));
    }

    #[test]
    fn can_retry_respects_max_attempts() {
        let policy = RetryPolicy::immediate(3);

        assert!(policy.can_retry(0));
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
        assert!(!policy.can_retry(4));
    }

    #[test]
    fn strategy_parses_from_env_spelling() {
        assert_eq!("fixed".parse::<BackoffStrategy>(), Ok(BackoffStrategy::Fixed));
        assert_eq!(
            "Exponential".parse::<BackoffStrategy>(),
            Ok(BackoffStrategy::ExponentialJitter)
        );
        assert!("linear".parse::<BackoffStrategy>().is_err());
    }
}
