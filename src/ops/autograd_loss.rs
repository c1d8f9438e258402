//! Autograd integration for multi-margin loss
//!
//! Wraps MultiMarginLossOps (Tensor-level) into a Var-level operation.
//! Only `input` is differentiable; target and weight are constants.

use crate::error::Result;
use crate::ops::traits::{MultiMarginLossOps, Reduction};
use numr::autograd::{GradFn, TensorId, Var};
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::sync::Arc;

/// Backward function for multi-margin loss.
///
/// Saved state: input, target and (optionally) weight.
struct MultiMarginLossBackward<R: Runtime> {
    input_ids: [TensorId; 1],
    saved_tensors: Vec<Tensor<R>>, // [input, target, weight?]
    input_grad_fns: [Option<Arc<dyn GradFn<R>>>; 1],
    p: i64,
    margin: f64,
    reduction: Reduction,
}

impl<R: Runtime> GradFn<R> for MultiMarginLossBackward<R>
where
    R::Client: MultiMarginLossOps<R>,
{
    fn backward(&self, grad_output: &Tensor<R>) -> numr::error::Result<Vec<Option<Tensor<R>>>> {
        let client = R::default_client(grad_output.device());
        let input = &self.saved_tensors[0];
        let target = &self.saved_tensors[1];
        let weight = self.saved_tensors.get(2);

        let grad_input = client
            .multi_margin_loss_bwd(
                grad_output,
                input,
                target,
                self.p,
                self.margin,
                weight,
                self.reduction,
            )
            .map_err(|e| {
                numr::error::Error::Internal(format!("multi_margin_loss_bwd failed: {}", e))
            })?;

        Ok(vec![Some(grad_input)])
    }

    fn backward_var(&self, grad_output: &Var<R>) -> numr::error::Result<Vec<Option<Var<R>>>> {
        // The gradient is piecewise constant (p = 1) or linear (p = 2) in the
        // input; higher-order terms are not tracked.
        let grads = self.backward(grad_output.tensor())?;
        Ok(grads
            .into_iter()
            .map(|g| g.map(|t| Var::new(t, false)))
            .collect())
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_ids
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn<R>>>> {
        self.input_grad_fns.to_vec()
    }

    fn saved_tensors(&self) -> &[Tensor<R>] {
        &self.saved_tensors
    }

    fn name(&self) -> &'static str {
        "MultiMarginLossBackward"
    }
}

/// Multi-margin loss with autograd tracking.
///
/// Wraps `MultiMarginLossOps::multi_margin_loss_fwd`. When `input` requires
/// grad, the backward pass is registered against it.
pub fn var_multi_margin_loss<R>(
    input: &Var<R>,
    target: &Tensor<R>,
    p: i64,
    margin: f64,
    weight: Option<&Tensor<R>>,
    reduction: Reduction,
) -> Result<Var<R>>
where
    R: Runtime,
    R::Client: MultiMarginLossOps<R>,
{
    let client = R::default_client(input.tensor().device());
    let output =
        client.multi_margin_loss_fwd(input.tensor(), target, p, margin, weight, reduction)?;

    if !input.requires_grad() {
        return Ok(Var::new(output, false));
    }

    let mut saved_tensors = vec![input.tensor().clone(), target.clone()];
    if let Some(w) = weight {
        saved_tensors.push(w.clone());
    }
    let grad_fn = MultiMarginLossBackward {
        input_ids: [input.id()],
        saved_tensors,
        input_grad_fns: [input.grad_fn().cloned()],
        p,
        margin,
        reduction,
    };
    Ok(Var::from_op(output, Arc::new(grad_fn)))
}
