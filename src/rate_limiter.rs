// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - I/O Rate Limiter
 * Token bucket throttle for disk read bandwidth
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use nonzero_ext::*;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::errors::{ScanError, ScanErrorKind};

const DEFAULT_CHUNK_SIZE: usize = 4096;
const MIN_BURST: u32 = 10;
const MAX_BURST: u32 = 1000;

/// One token per microsecond is the finest refill granularity supported
const MAX_TOKENS_PER_SECOND: u64 = 1_000_000;

/// Byte-rate limiter over a token bucket. One token covers `chunk_size`
/// bytes; a read of `n` bytes acquires ceil(n / chunk_size) tokens, granted
/// in the order waiters arrive.
pub struct ByteRateLimiter {
    limiter: Option<Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
    chunk_size: usize,
    close_token: CancelToken,
}

impl ByteRateLimiter {
    /// `bytes_per_second` of 0 disables limiting entirely.
    pub fn new(bytes_per_second: u64, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
        let close_token = CancelToken::new();

        if bytes_per_second == 0 {
            return Self {
                limiter: None,
                chunk_size,
                close_token,
            };
        }

        let tokens_per_second = (bytes_per_second / chunk_size as u64)
            .clamp(1, MAX_TOKENS_PER_SECOND) as u32;
        let burst = tokens_per_second.clamp(MIN_BURST, MAX_BURST);

        let quota = Quota::per_second(NonZeroU32::new(tokens_per_second).unwrap_or(nonzero!(1u32)))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(nonzero!(10u32)));
        let limiter = Arc::new(GovernorRateLimiter::direct(quota));

        debug!(
            bytes_per_second,
            chunk_size, tokens_per_second, burst, "byte rate limiter enabled"
        );

        Self {
            limiter: Some(limiter),
            chunk_size,
            close_token,
        }
    }

    /// Block until enough tokens cover `bytes`, or fail on cancellation or
    /// close
    pub async fn wait_for(&self, bytes: u64, cancel: &CancelToken) -> Result<(), ScanError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        let tokens_needed = (bytes.div_ceil(self.chunk_size as u64)).max(1);
        for _ in 0..tokens_needed {
            if self.close_token.is_cancelled() {
                return Err(Self::wait_error("limiter closed"));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Self::wait_error("wait cancelled")),
                _ = self.close_token.cancelled() => return Err(Self::wait_error("limiter closed")),
                _ = limiter.until_ready() => {}
            }
        }
        Ok(())
    }

    /// Grab a single token without blocking
    pub fn try_acquire(&self) -> bool {
        if self.close_token.is_cancelled() {
            return false;
        }
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Stop granting tokens and fail pending waiters. Idempotent.
    pub fn close(&self) {
        self.close_token.cancel();
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    fn wait_error(message: &str) -> ScanError {
        ScanError::new(
            ScanErrorKind::RateLimited,
            std::path::PathBuf::new(),
            "rate_limit",
            message,
        )
    }
}
