//! Nested-list JSON encoding of parameter vectors.
//!
//! A vector is a JSON array holding one entry per tensor, each tensor written as nested lists
//! whose depth and lengths give its shape (a bare number is a rank zero tensor). A cohort file
//! is an array of vectors, where every entry may also be a string holding an encoded vector.
//!
//! Nested lists cannot describe the axes under an empty one, so tensors with an empty axis
//! anywhere but last are refused at encoding time, as is a vector with no tensors at all.

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde_json::{Number, Value};

use super::{ParameterVector, Tensor};
use crate::{MlErr, Result};

pub(super) fn encode_vector(params: &ParameterVector) -> Result<Value> {
    if params.is_empty() {
        return Err(MlErr::Codec("parameter vector has no tensors".into()));
    }

    params
        .layers()
        .iter()
        .enumerate()
        .map(|(layer, tensor)| {
            check_encodable(tensor.shape(), layer)?;
            encode_tensor(tensor.view(), layer)
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn check_encodable(shape: &[usize], layer: usize) -> Result<()> {
    match shape.split_last() {
        Some((_, outer)) if outer.contains(&0) => Err(MlErr::Codec(format!(
            "tensor {layer} has shape {shape:?}, an empty axis is only allowed last"
        ))),
        _ => Ok(()),
    }
}

fn encode_tensor(view: ArrayViewD<'_, f32>, layer: usize) -> Result<Value> {
    if view.ndim() == 0 {
        let x = view.iter().next().copied().unwrap_or_default();
        return Number::from_f64(f64::from(x))
            .map(Value::Number)
            .ok_or_else(|| MlErr::Codec(format!("tensor {layer} holds non-finite value {x}")));
    }

    view.outer_iter()
        .map(|sub| encode_tensor(sub, layer))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

pub(super) fn decode_vector(value: &Value) -> Result<ParameterVector> {
    let Value::Array(tensors) = value else {
        return Err(MlErr::Codec(format!(
            "expected an array of tensors, got {}",
            kind(value)
        )));
    };

    if tensors.is_empty() {
        return Err(MlErr::Codec("parameter vector has no tensors".into()));
    }

    tensors
        .iter()
        .enumerate()
        .map(|(layer, tensor)| decode_tensor(tensor, layer))
        .collect::<Result<Vec<_>>>()
        .map(ParameterVector::new)
}

fn decode_tensor(value: &Value, layer: usize) -> Result<Tensor> {
    let shape = infer_shape(value);
    let mut data = Vec::with_capacity(shape.iter().product());
    flatten(value, &shape, layer, &mut data)?;

    Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
}

/// Follows the first element at every depth, `flatten` then checks the rest agrees.
fn infer_shape(mut value: &Value) -> Vec<usize> {
    let mut shape = Vec::new();

    while let Value::Array(items) = value {
        shape.push(items.len());
        match items.first() {
            Some(first) => value = first,
            None => break,
        }
    }

    shape
}

fn flatten(value: &Value, shape: &[usize], layer: usize, out: &mut Vec<f32>) -> Result<()> {
    match (value, shape.split_first()) {
        (Value::Number(n), None) => {
            let x = n
                .as_f64()
                .ok_or_else(|| MlErr::Codec(format!("tensor {layer} holds unrepresentable {n}")))?;
            out.push(x as f32);
            Ok(())
        }
        (Value::Array(items), Some((&len, rest))) if items.len() == len => items
            .iter()
            .try_for_each(|item| flatten(item, rest, layer, out)),
        (other, _) => Err(MlErr::Codec(format!(
            "tensor {layer} is ragged or non-numeric near {}",
            kind(other)
        ))),
    }
}

/// Decodes the collected cohort file into one vector per participant, in file order.
///
/// # Arguments
/// * `text` - The raw contents of the cohort file.
///
/// # Returns
/// The decoded vectors or a `MlErr::Codec` naming the first corrupt entry.
pub fn decode_cohort(text: &str) -> Result<Vec<ParameterVector>> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(entries) = &value else {
        return Err(MlErr::Codec(format!(
            "expected an array of parameter vectors, got {}",
            kind(&value)
        )));
    };

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let decoded = match entry {
                Value::String(inner) => serde_json::from_str(inner)
                    .map_err(MlErr::from)
                    .and_then(|v: Value| decode_vector(&v)),
                other => decode_vector(other),
            };

            decoded.map_err(|e| MlErr::Codec(format!("cohort entry {i}: {e}")))
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
