/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

//! Reconnect backoff for subchannel connection attempts.

use std::time::Duration;

use rand::Rng;

use crate::client::channel_args::ChannelArgs;
use crate::client::channel_args::INITIAL_RECONNECT_BACKOFF_MS;
use crate::client::channel_args::MAX_RECONNECT_BACKOFF_MS;
use crate::client::channel_args::MIN_RECONNECT_BACKOFF_MS;

#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// The amount of time to backoff after the first failure.
    pub base_delay: Duration,

    /// The factor with which to multiply backoffs after a failed retry.
    pub multiplier: f64,

    /// The factor with which backoffs are randomized.
    pub jitter: f64,

    /// The upper bound of backoff delay.
    pub max_delay: Duration,

    /// How long a single connection attempt may run before it is considered
    /// failed.
    pub min_connect_timeout: Duration,
}

/// Defaults from https://github.com/grpc/grpc/blob/master/doc/connection-backoff.md.
pub const DEFAULT_BACKOFF_CONFIG: BackoffConfig = BackoffConfig {
    base_delay: Duration::from_secs(1),
    multiplier: 1.6,
    jitter: 0.2,
    max_delay: Duration::from_secs(120),
    min_connect_timeout: Duration::from_secs(20),
};

impl Default for BackoffConfig {
    fn default() -> Self {
        DEFAULT_BACKOFF_CONFIG
    }
}

impl BackoffConfig {
    /// Builds a config from the defaults, overridden by any reconnect backoff
    /// entries present in `args`.
    pub fn from_channel_args(args: &ChannelArgs) -> Self {
        let mut config = DEFAULT_BACKOFF_CONFIG;
        if let Some(d) = args.get_duration_ms(INITIAL_RECONNECT_BACKOFF_MS) {
            config.base_delay = d;
        }
        if let Some(d) = args.get_duration_ms(MAX_RECONNECT_BACKOFF_MS) {
            config.max_delay = d;
        }
        if let Some(d) = args.get_duration_ms(MIN_RECONNECT_BACKOFF_MS) {
            config.min_connect_timeout = d;
        }
        if config.base_delay > config.max_delay {
            config.base_delay = config.max_delay;
        }
        config
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.base_delay > self.max_delay {
            Err("base_delay must not be greater than max_delay")?;
        }
        if self.multiplier < 1.0 {
            Err("multiplier must be greater than or equal to 1.0")?;
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            Err("jitter must be between 0 and 1")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,

    /// The delay for the next retry, without the random jitter. Store as f64
    /// to avoid rounding errors.
    next_delay_secs: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff {
            config: DEFAULT_BACKOFF_CONFIG,
            next_delay_secs: DEFAULT_BACKOFF_CONFIG.base_delay.as_secs_f64(),
        }
    }
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Result<Self, &'static str> {
        config.validate()?;
        let next_delay_secs = config.base_delay.as_secs_f64();
        Ok(ExponentialBackoff {
            config,
            next_delay_secs,
        })
    }

    /// Restarts the delay sequence at `base_delay`.
    pub fn reset(&mut self) {
        self.next_delay_secs = self.config.base_delay.as_secs_f64();
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// sequence.
    pub fn backoff_duration(&mut self) -> Duration {
        let next_delay = self.next_delay_secs;
        let cur_delay = if self.config.jitter == 0.0 {
            next_delay
        } else {
            next_delay * (1.0 + self.config.jitter * rand::rng().random_range(-1.0..1.0))
        };
        self.next_delay_secs = self
            .config
            .max_delay
            .as_secs_f64()
            .min(next_delay * self.config.multiplier);
        Duration::from_secs_f64(cur_delay)
    }

    pub fn min_connect_timeout(&self) -> Duration {
        self.config.min_connect_timeout
    }
}
