//! Coupon code generation.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Source of candidate coupon codes.
///
/// Candidates need not be unique; `CouponLifecycle::create` retries
/// against the store.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Uppercase alphanumeric codes of a fixed length.
#[derive(Debug, Clone, Copy)]
pub struct RandomCodeGenerator {
    length: usize,
}

impl RandomCodeGenerator {
    pub fn new(length: usize) -> Self {
        RandomCodeGenerator { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomCodeGenerator {
    fn default() -> Self {
        RandomCodeGenerator::new(8)
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect()
    }
}
