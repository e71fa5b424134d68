//! Carried model state for the stateful model units
//!
//! The generator and the vocoder both thread a set of named state slots
//! through every call. Slot shapes are fixed by the exported models; some
//! start with a zero-sized dimension and grow as the model runs.

use crate::error::{Result, SynthesisError};
use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;

/// Running state of one stateful model, keyed by input slot name (`state_N`)
pub type ModelState = HashMap<String, Tensor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDType {
    F32,
    I64,
    /// Stored as u8, 0 or 1
    Bool,
}

impl SlotDType {
    pub fn dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::I64 => DType::I64,
            Self::Bool => DType::U8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: SlotDType,
}

impl SlotSpec {
    pub fn new(index: usize, shape: &[usize], dtype: SlotDType) -> Self {
        Self {
            name: slot_name(index),
            shape: shape.to_vec(),
            dtype,
        }
    }

    /// True when the slot starts with an empty dimension and grows per step.
    pub fn is_dynamic(&self) -> bool {
        self.shape.contains(&0)
    }
}

pub fn slot_name(index: usize) -> String {
    format!("state_{}", index)
}

/// Generator slots: six transformer layers, each with a KV cache, a growing
/// buffer and a step counter.
pub fn flow_lm_slots() -> Vec<SlotSpec> {
    (0..6)
        .flat_map(|layer| {
            let base = layer * 3;
            [
                SlotSpec::new(base, &[2, 1, 1000, 16, 64], SlotDType::F32),
                SlotSpec::new(base + 1, &[0], SlotDType::F32),
                SlotSpec::new(base + 2, &[1], SlotDType::I64),
            ]
        })
        .collect()
}

/// Vocoder slots of the streaming Mimi decoder.
pub fn mimi_decoder_slots() -> Vec<SlotSpec> {
    use SlotDType::{Bool, F32, I64};
    let table: [(&[usize], SlotDType); 56] = [
        (&[1], Bool),
        (&[1, 512, 6], F32),
        (&[1], Bool),
        (&[1, 64, 2], F32),
        (&[1, 256, 6], F32),
        (&[1], Bool),
        (&[1, 256, 2], F32),
        (&[1], Bool),
        (&[1, 128, 0], F32),
        (&[1, 128, 5], F32),
        (&[1], Bool),
        (&[1, 128, 2], F32),
        (&[1], Bool),
        (&[1, 64, 0], F32),
        (&[1, 64, 4], F32),
        (&[1], Bool),
        (&[1, 64, 2], F32),
        (&[1], Bool),
        (&[1, 32, 0], F32),
        (&[2, 1, 8, 1000, 64], F32),
        (&[1], I64),
        (&[1], I64),
        (&[2, 1, 8, 1000, 64], F32),
        (&[1], I64),
        (&[1], I64),
        (&[1], Bool),
        (&[1, 512, 16], F32),
        (&[1], Bool),
        (&[1, 1, 6], F32),
        (&[1], Bool),
        (&[1, 64, 2], F32),
        (&[1], Bool),
        (&[1, 32, 0], F32),
        (&[1], Bool),
        (&[1, 512, 2], F32),
        (&[1], Bool),
        (&[1, 64, 4], F32),
        (&[1], Bool),
        (&[1, 128, 2], F32),
        (&[1], Bool),
        (&[1, 64, 0], F32),
        (&[1], Bool),
        (&[1, 128, 5], F32),
        (&[1], Bool),
        (&[1, 256, 2], F32),
        (&[1], Bool),
        (&[1, 128, 0], F32),
        (&[1], Bool),
        (&[1, 256, 6], F32),
        (&[2, 1, 8, 1000, 64], F32),
        (&[1], I64),
        (&[1], I64),
        (&[2, 1, 8, 1000, 64], F32),
        (&[1], I64),
        (&[1], I64),
        (&[1, 512, 16], F32),
    ];
    table
        .iter()
        .enumerate()
        .map(|(i, (shape, dtype))| SlotSpec::new(i, shape, *dtype))
        .collect()
}

/// Zero-initialized state for every slot. Dynamic slots start empty.
pub fn init_state(slots: &[SlotSpec], device: &Device) -> Result<ModelState> {
    slots
        .iter()
        .map(|slot| -> Result<(String, Tensor)> {
            let tensor = Tensor::zeros(slot.shape.as_slice(), slot.dtype.dtype(), device)?;
            Ok((slot.name.clone(), tensor))
        })
        .collect()
}

fn check_slot(slot: &SlotSpec, tensor: &Tensor, port: &'static str) -> Result<()> {
    if tensor.dtype() != slot.dtype.dtype() {
        return Err(SynthesisError::contract(
            port,
            format!(
                "{} has dtype {:?}, expected {:?}",
                slot.name,
                tensor.dtype(),
                slot.dtype.dtype()
            ),
        ));
    }
    if tensor.rank() != slot.shape.len() {
        return Err(SynthesisError::contract(
            port,
            format!(
                "{} has rank {}, expected {}",
                slot.name,
                tensor.rank(),
                slot.shape.len()
            ),
        ));
    }
    Ok(())
}

/// Fold named generator outputs (`out_state_N`) into the running state.
///
/// Outputs with other names are ignored. An output that does not map to a
/// known slot, or that disagrees with the slot's dtype or rank, is a
/// contract violation.
pub fn merge_outputs(
    state: &mut ModelState,
    outputs: impl IntoIterator<Item = (String, Tensor)>,
    slots: &[SlotSpec],
    port: &'static str,
) -> Result<()> {
    for (name, tensor) in outputs {
        let Some(index) = name.strip_prefix("out_state_") else {
            continue;
        };
        let target = format!("state_{}", index);
        let slot = slots
            .iter()
            .find(|s| s.name == target)
            .ok_or_else(|| SynthesisError::contract(port, format!("unknown state output {}", name)))?;
        check_slot(slot, &tensor, port)?;
        state.insert(target, tensor);
    }
    Ok(())
}

/// Fold positional vocoder state outputs into the running state.
///
/// The i-th tensor updates slot `state_i`; the count must match the table.
pub fn merge_ordered(
    state: &mut ModelState,
    outputs: Vec<Tensor>,
    slots: &[SlotSpec],
    port: &'static str,
) -> Result<()> {
    if outputs.len() != slots.len() {
        return Err(SynthesisError::contract(
            port,
            format!("{} state outputs, expected {}", outputs.len(), slots.len()),
        ));
    }
    for (slot, tensor) in slots.iter().zip(outputs) {
        check_slot(slot, &tensor, port)?;
        state.insert(slot.name.clone(), tensor);
    }
    Ok(())
}
