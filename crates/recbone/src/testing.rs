//! Shared test support.

use burn::backend::{Autodiff, NdArray};
use burn::prelude::{Backend, Tensor};

/// Inference backend; batch norm uses running stats and dropout is inactive.
pub type TestBackend = NdArray<f32>;

/// Training backend; dropout is active.
pub type TestAutodiffBackend = Autodiff<TestBackend>;

/// Assert that a forward function is a pure function of its input.
pub fn assert_idempotent_forward<B: Backend, F>(
    input: Tensor<B, 4>,
    forward: F,
) where
    F: Fn(Tensor<B, 4>) -> Tensor<B, 4>,
{
    let first = forward(input.clone());
    let second = forward(input);
    first.to_data().assert_eq(&second.to_data(), true);
}
