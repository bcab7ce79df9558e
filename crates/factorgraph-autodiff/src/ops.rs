//! Reference operations.
//!
//! Small element-wise and matrix operations implementing [`Operation`].
//! They cover what the engine's own tests, demos and gradient checker need;
//! real models are expected to bring their own.

use crate::operation::Operation;
use factorgraph_core::{shape_of, GraphError, Result, Tensor};

/// Fails unless exactly `expected` operands were supplied.
fn check_arity(op: &str, operands: &[&Tensor], expected: usize) -> Result<()> {
    if operands.len() == expected {
        Ok(())
    } else {
        Err(GraphError::operation_failed(
            op,
            format!("expected {expected} operand(s), got {}", operands.len()),
        ))
    }
}

/// Fails unless the two tensors have the same shape.
fn check_same_shape(op: &str, lhs: &Tensor, rhs: &Tensor) -> Result<()> {
    if shape_of(lhs) == shape_of(rhs) {
        Ok(())
    } else {
        Err(GraphError::operation_failed(
            op,
            format!(
                "shape mismatch: {:?} vs {:?}",
                shape_of(lhs),
                shape_of(rhs)
            ),
        ))
    }
}

/// Returns the single output gradient of a one-output operation.
fn single_grad<'a>(op: &str, output_grads: &[&'a Tensor]) -> Result<&'a Tensor> {
    match output_grads {
        &[grad] => Ok(grad),
        _ => Err(GraphError::operation_failed(
            op,
            format!("expected 1 output gradient, got {}", output_grads.len()),
        )),
    }
}

/// Element-wise addition.
#[derive(Debug, Clone)]
pub struct Add;

impl Operation for Add {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 2)?;
        check_same_shape(self.name(), operands[0], operands[1])?;
        Ok(vec![operands[0] + operands[1]])
    }

    fn backward(
        &self,
        _operands: &[&Tensor],
        _outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        let grad = single_grad(self.name(), output_grads)?;
        Ok(vec![grad.clone(), grad.clone()])
    }

    fn name(&self) -> &str {
        "Add"
    }
}

/// Element-wise multiplication.
#[derive(Debug, Clone)]
pub struct Multiply;

impl Operation for Multiply {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 2)?;
        check_same_shape(self.name(), operands[0], operands[1])?;
        Ok(vec![operands[0].component_mul(operands[1])])
    }

    fn backward(
        &self,
        operands: &[&Tensor],
        _outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 2)?;
        let grad = single_grad(self.name(), output_grads)?;
        // d/dx (x * y) = y
        // d/dy (x * y) = x
        Ok(vec![
            grad.component_mul(operands[1]),
            grad.component_mul(operands[0]),
        ])
    }

    fn name(&self) -> &str {
        "Multiply"
    }
}

/// Matrix multiplication.
#[derive(Debug, Clone)]
pub struct MatMul;

impl Operation for MatMul {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 2)?;
        if operands[0].ncols() != operands[1].nrows() {
            return Err(GraphError::operation_failed(
                self.name(),
                format!(
                    "cannot multiply {:?} by {:?}",
                    shape_of(operands[0]),
                    shape_of(operands[1])
                ),
            ));
        }
        Ok(vec![operands[0] * operands[1]])
    }

    fn backward(
        &self,
        operands: &[&Tensor],
        _outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 2)?;
        let grad = single_grad(self.name(), output_grads)?;
        // d/dA (A * B) = grad * B^T
        // d/dB (A * B) = A^T * grad
        Ok(vec![
            grad * operands[1].transpose(),
            operands[0].transpose() * grad,
        ])
    }

    fn name(&self) -> &str {
        "MatMul"
    }
}

/// Element-wise square.
#[derive(Debug, Clone)]
pub struct Square;

impl Operation for Square {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        Ok(vec![operands[0].component_mul(operands[0])])
    }

    fn backward(
        &self,
        operands: &[&Tensor],
        _outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        let grad = single_grad(self.name(), output_grads)?;
        Ok(vec![grad.component_mul(operands[0]) * 2.0])
    }

    fn name(&self) -> &str {
        "Square"
    }
}

/// Multiplication by a fixed scalar.
#[derive(Debug, Clone)]
pub struct Scale {
    /// Multiplier applied to every element
    pub factor: f64,
}

impl Scale {
    /// Creates a new Scale operation.
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Operation for Scale {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        Ok(vec![operands[0] * self.factor])
    }

    fn backward(
        &self,
        _operands: &[&Tensor],
        _outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        let grad = single_grad(self.name(), output_grads)?;
        Ok(vec![grad * self.factor])
    }

    fn name(&self) -> &str {
        "Scale"
    }
}

/// Sum of all elements, producing a `1x1` tensor.
#[derive(Debug, Clone)]
pub struct Sum;

impl Operation for Sum {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        Ok(vec![Tensor::from_element(1, 1, operands[0].sum())])
    }

    fn backward(
        &self,
        operands: &[&Tensor],
        _outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        let grad = single_grad(self.name(), output_grads)?;
        // Broadcast gradient to input shape
        let (rows, cols) = shape_of(operands[0]);
        Ok(vec![Tensor::from_element(rows, cols, grad[(0, 0)])])
    }

    fn name(&self) -> &str {
        "Sum"
    }
}

/// Negation.
#[derive(Debug, Clone)]
pub struct Negate;

impl Operation for Negate {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        Ok(vec![-operands[0]])
    }

    fn backward(
        &self,
        _operands: &[&Tensor],
        _outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        let grad = single_grad(self.name(), output_grads)?;
        Ok(vec![-grad])
    }

    fn name(&self) -> &str {
        "Negate"
    }
}

/// ReLU (Rectified Linear Unit) activation.
#[derive(Debug, Clone)]
pub struct ReLU;

impl Operation for ReLU {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        Ok(vec![operands[0].map(|x| x.max(0.0))])
    }

    fn backward(
        &self,
        operands: &[&Tensor],
        _outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        let grad = single_grad(self.name(), output_grads)?;
        let mask = operands[0].map(|x| if x > 0.0 { 1.0 } else { 0.0 });
        Ok(vec![grad.component_mul(&mask)])
    }

    fn name(&self) -> &str {
        "ReLU"
    }
}

/// Element-wise exponential.
#[derive(Debug, Clone)]
pub struct Exp;

impl Operation for Exp {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        Ok(vec![operands[0].map(f64::exp)])
    }

    fn backward(
        &self,
        _operands: &[&Tensor],
        outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        let grad = single_grad(self.name(), output_grads)?;
        let [output] = outputs else {
            return Err(GraphError::operation_failed(self.name(), "expected 1 output"));
        };
        // d/dx exp(x) = exp(x)
        Ok(vec![grad.component_mul(*output)])
    }

    fn name(&self) -> &str {
        "Exp"
    }
}

/// Splits one operand into two outputs: a copy and its negation.
#[derive(Debug, Clone)]
pub struct Split;

impl Operation for Split {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        check_arity(self.name(), operands, 1)?;
        Ok(vec![operands[0].clone(), -operands[0]])
    }

    fn backward(
        &self,
        _operands: &[&Tensor],
        _outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        let [positive, negative] = output_grads else {
            return Err(GraphError::operation_failed(
                self.name(),
                format!("expected 2 output gradients, got {}", output_grads.len()),
            ));
        };
        Ok(vec![*positive - *negative])
    }

    fn name(&self) -> &str {
        "Split"
    }
}
