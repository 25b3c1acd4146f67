//! Renderer-side parameter slot table
//!
//! Generated shader text refers to a parameter as `<array>[<offset>]`, where
//! the offset is the parameter's position among the registered parameters of
//! its kind. Only [`ParameterRegistry::refresh`] recomputes offsets, so the
//! text of every other parameter stays put while payloads change.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shape of a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamKind {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl ParamKind {
    pub const ALL: [ParamKind; 6] = [
        Self::Scalar,
        Self::Vec2,
        Self::Vec3,
        Self::Vec4,
        Self::Mat3,
        Self::Mat4,
    ];

    /// Number of floats in a payload
    pub fn len(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }

    /// Floats per array element under std430 layout
    pub fn std430_len(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 | Self::Vec4 => 4,
            Self::Mat3 => 12,
            Self::Mat4 => 16,
        }
    }

    /// Name of the uniform array holding parameters of this kind
    pub fn array_name(self) -> &'static str {
        match self {
            Self::Scalar => "param_scalar",
            Self::Vec2 => "param_vec2",
            Self::Vec3 => "param_vec3",
            Self::Vec4 => "param_vec4",
            Self::Mat3 => "param_mat3",
            Self::Mat4 => "param_mat4",
        }
    }

    /// WGSL element type
    pub fn wgsl_type(self) -> &'static str {
        match self {
            Self::Scalar => "f32",
            Self::Vec2 => "vec2<f32>",
            Self::Vec3 => "vec3<f32>",
            Self::Vec4 => "vec4<f32>",
            Self::Mat3 => "mat3x3<f32>",
            Self::Mat4 => "mat4x4<f32>",
        }
    }
}

/// Registry handle. Id 0 means "not registered": emit a literal instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ParamId(pub u32);

impl ParamId {
    pub const UNREGISTERED: Self = Self(0);

    pub fn is_registered(self) -> bool {
        self.0 != 0
    }
}

#[derive(Debug, Clone)]
struct Slot {
    kind: ParamKind,
    payload: Vec<f32>,
}

/// Slot table for numeric parameters referenced by generated shaders
#[derive(Debug)]
pub struct ParameterRegistry {
    capacity: usize,
    next_id: u32,
    slots: BTreeMap<ParamId, Slot>,
    offsets: HashMap<ParamId, u32>,
    dirty_kinds: BTreeSet<ParamKind>,
}

impl ParameterRegistry {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Registry holding at most `capacity` live slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: 1,
            slots: BTreeMap::new(),
            offsets: HashMap::new(),
            dirty_kinds: BTreeSet::new(),
        }
    }

    /// Allocate a zeroed slot. Returns [`ParamId::UNREGISTERED`] when the
    /// table is full; ids are never reused.
    pub fn register(&mut self, kind: ParamKind) -> ParamId {
        if self.slots.len() >= self.capacity || self.next_id == u32::MAX {
            tracing::warn!(
                "parameter registry exhausted ({} live slots), falling back to literals",
                self.slots.len()
            );
            return ParamId::UNREGISTERED;
        }
        let id = ParamId(self.next_id);
        self.next_id += 1;
        self.slots.insert(
            id,
            Slot {
                kind,
                payload: vec![0.0; kind.len()],
            },
        );
        self.dirty_kinds.insert(kind);
        id
    }

    /// Free a slot. Returns whether it was registered.
    pub fn unregister(&mut self, id: ParamId) -> bool {
        match self.slots.remove(&id) {
            Some(slot) => {
                self.dirty_kinds.insert(slot.kind);
                true
            }
            None => false,
        }
    }

    pub fn kind(&self, id: ParamId) -> Option<ParamKind> {
        self.slots.get(&id).map(|s| s.kind)
    }

    pub fn payload(&self, id: ParamId) -> Option<&[f32]> {
        self.slots.get(&id).map(|s| s.payload.as_slice())
    }

    /// Replace a slot's payload. Never touches shader text.
    pub fn set_payload(&mut self, id: ParamId, values: &[f32]) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(Error::UnknownParameter(id.0))?;
        if values.len() != slot.kind.len() {
            return Err(Error::PayloadSize {
                id: id.0,
                expected: slot.kind.len(),
                actual: values.len(),
            });
        }
        if slot.payload != values {
            slot.payload.copy_from_slice(values);
            self.dirty_kinds.insert(slot.kind);
        }
        Ok(())
    }

    /// Recompute every slot's offset within its kind, in id order.
    /// Returns whether any offset moved or disappeared.
    pub fn refresh(&mut self) -> bool {
        let mut next: HashMap<ParamKind, u32> = HashMap::new();
        let mut offsets = HashMap::with_capacity(self.slots.len());
        for (id, slot) in &self.slots {
            let counter = next.entry(slot.kind).or_insert(0);
            offsets.insert(*id, *counter);
            *counter += 1;
        }
        let changed = offsets != self.offsets;
        self.offsets = offsets;
        if changed {
            tracing::debug!("parameter layout changed, {} live slots", self.slots.len());
        }
        changed
    }

    /// `"<array>[<offset>]"` as of the last refresh
    pub fn parameter_string(&self, id: ParamId) -> Option<String> {
        let kind = self.kind(id)?;
        let offset = self.offsets.get(&id)?;
        Some(format!("{}[{}]", kind.array_name(), offset))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Live slots of `kind`
    pub fn count(&self, kind: ParamKind) -> usize {
        self.slots.values().filter(|s| s.kind == kind).count()
    }

    /// Payloads of `kind` in offset order, std430-padded, ready for upload
    pub fn packed(&self, kind: ParamKind) -> Vec<f32> {
        let mut entries: Vec<(u32, &Slot)> = self
            .slots
            .iter()
            .filter(|(_, s)| s.kind == kind)
            .filter_map(|(id, s)| self.offsets.get(id).map(|o| (*o, s)))
            .collect();
        entries.sort_by_key(|(o, _)| *o);

        let mut out = Vec::with_capacity(entries.len() * kind.std430_len());
        for (_, slot) in entries {
            match kind {
                ParamKind::Vec3 => {
                    out.extend_from_slice(&slot.payload);
                    out.push(0.0);
                }
                ParamKind::Mat3 => {
                    for column in slot.payload.chunks_exact(3) {
                        out.extend_from_slice(column);
                        out.push(0.0);
                    }
                }
                _ => out.extend_from_slice(&slot.payload),
            }
        }
        out
    }

    /// [`Self::packed`] as raw bytes
    pub fn packed_bytes(&self, kind: ParamKind) -> Vec<u8> {
        bytemuck::cast_slice(&self.packed(kind)).to_vec()
    }

    /// Kinds whose buffers changed since the last call
    pub fn take_dirty_kinds(&mut self) -> Vec<ParamKind> {
        std::mem::take(&mut self.dirty_kinds).into_iter().collect()
    }
}

impl Default for ParameterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut reg = ParameterRegistry::new();
        let a = reg.register(ParamKind::Vec3);
        let b = reg.register(ParamKind::Mat4);
        assert_eq!(a, ParamId(1));
        assert_eq!(b, ParamId(2));
        assert!(reg.unregister(a));
        let c = reg.register(ParamKind::Vec3);
        assert_eq!(c, ParamId(3));
    }

    #[test]
    fn offsets_count_within_kind() {
        let mut reg = ParameterRegistry::new();
        let a = reg.register(ParamKind::Vec3);
        let m = reg.register(ParamKind::Mat4);
        let b = reg.register(ParamKind::Vec3);
        assert!(reg.refresh());
        assert_eq!(reg.parameter_string(a).as_deref(), Some("param_vec3[0]"));
        assert_eq!(reg.parameter_string(m).as_deref(), Some("param_mat4[0]"));
        assert_eq!(reg.parameter_string(b).as_deref(), Some("param_vec3[1]"));

        reg.unregister(a);
        assert!(reg.refresh());
        assert_eq!(reg.parameter_string(b).as_deref(), Some("param_vec3[0]"));
        assert!(!reg.refresh());
    }

    #[test]
    fn payload_updates_leave_strings_alone() {
        let mut reg = ParameterRegistry::new();
        let a = reg.register(ParamKind::Vec3);
        let b = reg.register(ParamKind::Vec3);
        reg.refresh();
        let before = reg.parameter_string(b);
        assert!(reg.set_payload(a, &[1.0, 2.0, 3.0]).is_ok());
        assert!(!reg.refresh());
        assert_eq!(reg.parameter_string(b), before);
        assert_eq!(reg.payload(a), Some(&[1.0, 2.0, 3.0][..]));
    }

    #[test]
    fn payload_size_is_checked() {
        let mut reg = ParameterRegistry::new();
        let a = reg.register(ParamKind::Mat4);
        assert!(matches!(
            reg.set_payload(a, &[0.0; 3]),
            Err(Error::PayloadSize {
                expected: 16,
                actual: 3,
                ..
            })
        ));
        assert!(matches!(
            reg.set_payload(ParamId(99), &[0.0]),
            Err(Error::UnknownParameter(99))
        ));
    }

    #[test]
    fn exhaustion_returns_sentinel() {
        let mut reg = ParameterRegistry::with_capacity(1);
        assert!(reg.register(ParamKind::Scalar).is_registered());
        assert_eq!(reg.register(ParamKind::Scalar), ParamId::UNREGISTERED);
    }

    #[test]
    fn vec3_and_mat3_pack_with_padding() {
        let mut reg = ParameterRegistry::new();
        let v = reg.register(ParamKind::Vec3);
        let m = reg.register(ParamKind::Mat3);
        reg.refresh();
        reg.set_payload(v, &[1.0, 2.0, 3.0]).ok();
        reg.set_payload(m, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0])
            .ok();
        assert_eq!(reg.packed(ParamKind::Vec3), vec![1.0, 2.0, 3.0, 0.0]);
        assert_eq!(reg.packed(ParamKind::Mat3).len(), 12);
        assert_eq!(reg.packed_bytes(ParamKind::Vec3).len(), 16);
    }

    #[test]
    fn dirty_kinds_drain() {
        let mut reg = ParameterRegistry::new();
        let v = reg.register(ParamKind::Vec2);
        assert_eq!(reg.take_dirty_kinds(), vec![ParamKind::Vec2]);
        assert!(reg.take_dirty_kinds().is_empty());
        reg.set_payload(v, &[0.0, 0.0]).ok();
        assert!(reg.take_dirty_kinds().is_empty());
        reg.set_payload(v, &[1.0, 0.0]).ok();
        assert_eq!(reg.take_dirty_kinds(), vec![ParamKind::Vec2]);
    }
}
