//! Reduction-group kernels for multi-margin loss on the host.
//!
//! Each sample is one group of `GROUP_SIZE` workers. Worker `t` owns classes
//! `t, t + GROUP_SIZE, ...` and one slot of the group's partial-sum array.
//! Groups run in parallel on rayon's pool; the workers of a group run in
//! order, so the phase boundaries stand in for the device barriers and the
//! summation order is the same as the CUDA and WGSL kernels.
//!
//! Margin terms are evaluated in the element type, partial sums in the
//! element's accumulator type (F32 for F16/BF16/F32, F64 for F64).

use crate::ops::impl_generic::loss::GROUP_SIZE;
use half::{bf16, f16};
use rayon::prelude::*;
use std::ops::{Add, Div, Mul, Sub};

/// Accumulator type for partial sums.
pub trait Accumulator:
    Copy
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    const ZERO: Self;
    const ONE: Self;
    const TWO: Self;

    fn from_usize(n: usize) -> Self;
}

impl Accumulator for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const TWO: Self = 2.0;

    #[inline]
    fn from_usize(n: usize) -> Self {
        n as f32
    }
}

impl Accumulator for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const TWO: Self = 2.0;

    #[inline]
    fn from_usize(n: usize) -> Self {
        n as f64
    }
}

/// Floating element type the kernels are instantiated for.
pub trait MarginElement:
    bytemuck::Pod
    + Send
    + Sync
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
{
    type Acc: Accumulator;

    const ZERO: Self;

    fn from_f64(v: f64) -> Self;
    fn to_acc(self) -> Self::Acc;
    fn from_acc(acc: Self::Acc) -> Self;
}

impl MarginElement for f32 {
    type Acc = f32;
    const ZERO: Self = 0.0;

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    #[inline]
    fn to_acc(self) -> f32 {
        self
    }
    #[inline]
    fn from_acc(acc: f32) -> Self {
        acc
    }
}

impl MarginElement for f64 {
    type Acc = f64;
    const ZERO: Self = 0.0;

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }
    #[inline]
    fn to_acc(self) -> f64 {
        self
    }
    #[inline]
    fn from_acc(acc: f64) -> Self {
        acc
    }
}

impl MarginElement for f16 {
    type Acc = f32;
    const ZERO: Self = f16::ZERO;

    #[inline]
    fn from_f64(v: f64) -> Self {
        f16::from_f64(v)
    }
    #[inline]
    fn to_acc(self) -> f32 {
        self.to_f32()
    }
    #[inline]
    fn from_acc(acc: f32) -> Self {
        f16::from_f32(acc)
    }
}

impl MarginElement for bf16 {
    type Acc = f32;
    const ZERO: Self = bf16::ZERO;

    #[inline]
    fn from_f64(v: f64) -> Self {
        bf16::from_f64(v)
    }
    #[inline]
    fn to_acc(self) -> f32 {
        self.to_f32()
    }
    #[inline]
    fn from_acc(acc: f32) -> Self {
        bf16::from_f32(acc)
    }
}

#[inline]
fn sum_slots<A: Accumulator>(slots: &[A]) -> A {
    slots.iter().fold(A::ZERO, |acc, &s| acc + s)
}

fn forward_group<T: MarginElement, const P: u8>(
    row: &[T],
    target: usize,
    target_weight: Option<T>,
    margin: T,
    denom: T::Acc,
) -> T {
    let input_target = row[target];
    let mut slots = [<T::Acc as Accumulator>::ZERO; GROUP_SIZE];

    for (worker, slot) in slots.iter_mut().enumerate() {
        for i in (worker..row.len()).step_by(GROUP_SIZE) {
            if i == target {
                continue;
            }
            let z = margin - input_target + row[i];
            if z > T::ZERO {
                let mut h = if P == 1 { z } else { z * z };
                if let Some(w) = target_weight {
                    h = h * w;
                }
                *slot = *slot + h.to_acc();
            }
        }
    }

    // barrier: worker 0 reduces the slots in order
    T::from_acc(sum_slots(&slots) / denom)
}

#[allow(clippy::too_many_arguments)]
fn backward_group<T: MarginElement, const P: u8>(
    grad_row: &mut [T],
    row: &[T],
    target: usize,
    target_weight: Option<T::Acc>,
    margin: T,
    g: T::Acc,
    scale: T,
) {
    let input_target = row[target];
    let mut slots = [<T::Acc as Accumulator>::ZERO; GROUP_SIZE];

    for (worker, slot) in slots.iter_mut().enumerate() {
        for i in (worker..row.len()).step_by(GROUP_SIZE) {
            if i == target {
                continue;
            }
            let z = margin - input_target + row[i];
            if z > T::ZERO {
                let mut h = if P == 1 {
                    g
                } else {
                    <T::Acc as Accumulator>::TWO * g * z.to_acc()
                };
                if let Some(w) = target_weight {
                    h = h * w;
                }
                let h = T::from_acc(h);
                *slot = *slot - h.to_acc();
                grad_row[i] = h;
            } else {
                grad_row[i] = T::ZERO;
            }
        }
    }

    // barrier: the target cell is the negated sum of every other cell
    grad_row[target] = T::from_acc(sum_slots(&slots));

    // barrier: scale by the upstream gradient
    for cell in grad_row.iter_mut() {
        *cell = *cell * scale;
    }
}

/// Forward: `output[k] = loss_k` for every sample.
///
/// `input` is `[output.len(), dim]` row-major; `targets` are in `[0, dim)`.
#[allow(clippy::too_many_arguments)]
pub fn multi_margin_fwd<T: MarginElement, const P: u8>(
    output: &mut [T],
    input: &[T],
    targets: &[i64],
    weight: Option<&[T]>,
    dim: usize,
    margin: T,
    denom: usize,
) {
    let denom = <T::Acc as Accumulator>::from_usize(denom);
    output
        .par_iter_mut()
        .zip(input.par_chunks(dim))
        .zip(targets.par_iter())
        .for_each(|((out, row), &target)| {
            let target = target as usize;
            let target_weight = weight.map(|w| w[target]);
            *out = forward_group::<T, P>(row, target, target_weight, margin, denom);
        });
}

/// Backward: full `[N, dim]` gradient, scaled by `grad_output[0]` when
/// `reduce` and by `grad_output[k]` otherwise.
#[allow(clippy::too_many_arguments)]
pub fn multi_margin_bwd<T: MarginElement, const P: u8>(
    grad_input: &mut [T],
    grad_output: &[T],
    input: &[T],
    targets: &[i64],
    weight: Option<&[T]>,
    dim: usize,
    margin: T,
    denom: usize,
    reduce: bool,
) {
    let acc = |n| <T::Acc as Accumulator>::from_usize(n);
    let g = <T::Acc as Accumulator>::ONE / acc(denom);
    grad_input
        .par_chunks_mut(dim)
        .zip(input.par_chunks(dim))
        .zip(targets.par_iter())
        .enumerate()
        .for_each(|(k, ((grad_row, row), &target))| {
            let target = target as usize;
            let target_weight = weight.map(|w| w[target].to_acc());
            let scale = if reduce { grad_output[0] } else { grad_output[k] };
            backward_group::<T, P>(grad_row, row, target, target_weight, margin, g, scale);
        });
}
