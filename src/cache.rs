//! Per-frame cache and checkpoint files.
//!
//! [`FrameCache`] keeps one [`SystemSnapshot`] per simulated frame. Once a
//! frame is cached the scene loads it instead of simulating it again.
//!
//! Checkpoints persist a snapshot to disk in two formats:
//!
//! - **Binary** (`<name>.<frame>.pdc`): restores a bit-identical snapshot.
//! - **ASCII** (`<name>.<frame>.json`): human-readable JSON for inspection
//!   and interchange. Values round-trip to `f32` precision; infinite
//!   lifespans are written as `null`.
//!
//! # Binary layout
//!
//! All integers little-endian.
//!
//! | Field | Type |
//! |-------|------|
//! | magic | `b"DYNFXPDC"` |
//! | version | `u32` |
//! | frame | `i64` |
//! | particle count | `u64` |
//! | next id | `u64` |
//! | emitter carry count + values | `u32`, `f32 × n` |
//! | schema length + JSON | `u32`, bytes |
//! | particles | [`CheckpointParticle`] × count |
//! | custom columns | in schema order, `count` values each |

use crate::attributes::{AttributeDecl, AttributeKind, AttributeStore, Column};
use crate::error::{DynamicsError, Result};
use crate::particle::{ParticleId, ParticleState};
use crate::system::{ParticleData, SystemSnapshot};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const MAGIC: &[u8; 8] = b"DYNFXPDC";
pub const VERSION: u32 = 1;

/// In-memory cache of one system's frames.
#[derive(Clone, Debug, Default)]
pub struct FrameCache {
    frames: BTreeMap<i64, SystemSnapshot>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot under its frame, replacing any previous entry.
    pub fn save(&mut self, snapshot: SystemSnapshot) {
        self.frames.insert(snapshot.frame, snapshot);
    }

    pub fn load(&self, frame: i64) -> Option<&SystemSnapshot> {
        self.frames.get(&frame)
    }

    pub fn contains(&self, frame: i64) -> bool {
        self.frames.contains_key(&frame)
    }

    /// Latest cached frame not after `frame`.
    pub fn latest_at_or_before(&self, frame: i64) -> Option<&SystemSnapshot> {
        self.frames.range(..=frame).next_back().map(|(_, s)| s)
    }

    /// Drop every frame after `frame`.
    pub fn truncate(&mut self, frame: i64) {
        if let Some(next) = frame.checked_add(1) {
            self.frames.split_off(&next);
        }
    }

    pub fn frames(&self) -> impl Iterator<Item = i64> + '_ {
        self.frames.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

// =============================================================================
// BINARY CHECKPOINT
// =============================================================================

/// Fixed-size particle record in the binary body.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CheckpointParticle {
    pub id: u64,
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub mass: f32,
    pub age: f32,
    pub lifespan: f32,
    pub state: u32,
    pub collisions: u32,
    pub _pad: u32,
}

/// Checkpoint path for `name` at `frame`.
pub fn checkpoint_path(dir: &Path, name: &str, frame: i64, ascii: bool) -> PathBuf {
    let ext = if ascii { "json" } else { "pdc" };
    dir.join(format!("{}.{}.{}", name, frame, ext))
}

/// Encode a snapshot into the binary checkpoint format.
pub fn encode(snapshot: &SystemSnapshot) -> Result<Vec<u8>> {
    let data = &snapshot.data;
    data.validate()?;
    let n = data.len();
    let schema = serde_json::to_vec(data.attributes.declarations())?;

    let mut out = Vec::with_capacity(64 + schema.len() + n * std::mem::size_of::<CheckpointParticle>());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&snapshot.frame.to_le_bytes());
    out.extend_from_slice(&(n as u64).to_le_bytes());
    out.extend_from_slice(&data.next_id.to_le_bytes());
    out.extend_from_slice(&(snapshot.carries.len() as u32).to_le_bytes());
    for carry in &snapshot.carries {
        out.extend_from_slice(&carry.to_le_bytes());
    }
    out.extend_from_slice(&(schema.len() as u32).to_le_bytes());
    out.extend_from_slice(&schema);

    let body: Vec<CheckpointParticle> = (0..n)
        .map(|i| CheckpointParticle {
            id: data.ids[i].0,
            position: data.positions[i].to_array(),
            velocity: data.velocities[i].to_array(),
            mass: data.masses[i],
            age: data.ages[i],
            lifespan: data.lifespans[i],
            state: data.states[i] as u32,
            collisions: data.collisions[i],
            _pad: 0,
        })
        .collect();
    out.extend_from_slice(bytemuck::cast_slice(&body));

    for column in data.attributes.columns() {
        match column {
            Column::Float(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Column::Int(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Column::Vector(v) => v
                .iter()
                .flat_map(|x| x.to_array())
                .for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        }
    }
    Ok(out)
}

/// Bounds-checked reader over checkpoint bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| DynamicsError::CheckpointFormat(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn count(&mut self, n: usize, size: usize) -> Result<usize> {
        n.checked_mul(size)
            .and_then(|total| self.pos.checked_add(total))
            .filter(|end| *end <= self.bytes.len())
            .map(|_| n)
            .ok_or_else(|| DynamicsError::CheckpointFormat(format!("{} records overrun the file", n)))
    }
}

/// Decode a binary checkpoint.
pub fn decode(bytes: &[u8]) -> Result<SystemSnapshot> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(MAGIC.len())? != MAGIC {
        return Err(DynamicsError::CheckpointFormat("bad magic".into()));
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(DynamicsError::CheckpointFormat(format!("unsupported version {}", version)));
    }
    let frame = r.i64()?;
    let n = r.u64()? as usize;
    let next_id = r.u64()?;

    let carry_count = r.u32()? as usize;
    let carry_count = r.count(carry_count, 4)?;
    let carries = (0..carry_count).map(|_| r.f32()).collect::<Result<Vec<_>>>()?;

    let schema_len = r.u32()? as usize;
    let decls: Vec<AttributeDecl> = serde_json::from_slice(r.take(schema_len)?)?;

    let record = std::mem::size_of::<CheckpointParticle>();
    let n = r.count(n, record)?;
    let body = r.take(n * record)?;
    let mut data = ParticleData {
        next_id,
        ..ParticleData::default()
    };
    for chunk in body.chunks_exact(record) {
        let p: CheckpointParticle = bytemuck::pod_read_unaligned(chunk);
        let state = ParticleState::from_u32(p.state)
            .ok_or_else(|| DynamicsError::CheckpointFormat(format!("bad particle state {}", p.state)))?;
        data.ids.push(ParticleId(p.id));
        data.positions.push(Vec3::from_array(p.position));
        data.velocities.push(Vec3::from_array(p.velocity));
        data.masses.push(p.mass);
        data.ages.push(p.age);
        data.lifespans.push(p.lifespan);
        data.states.push(state);
        data.collisions.push(p.collisions);
    }

    let mut columns = Vec::with_capacity(decls.len());
    for decl in &decls {
        let column = match decl.kind {
            AttributeKind::Float => {
                Column::Float((0..r.count(n, 4)?).map(|_| r.f32()).collect::<Result<_>>()?)
            }
            AttributeKind::Int => {
                Column::Int((0..r.count(n, 4)?).map(|_| r.i32()).collect::<Result<_>>()?)
            }
            AttributeKind::Vector => Column::Vector(
                (0..r.count(n, 12)?)
                    .map(|_| -> Result<Vec3> { Ok(Vec3::new(r.f32()?, r.f32()?, r.f32()?)) })
                    .collect::<Result<_>>()?,
            ),
        };
        columns.push(column);
    }
    if r.pos != bytes.len() {
        return Err(DynamicsError::CheckpointFormat(format!(
            "{} trailing bytes",
            bytes.len() - r.pos
        )));
    }
    data.attributes = AttributeStore::from_parts(decls, columns, n)?;
    data.validate()?;
    Ok(SystemSnapshot { frame, data, carries })
}

/// Write a binary checkpoint.
pub fn write_checkpoint(path: &Path, snapshot: &SystemSnapshot) -> Result<()> {
    let bytes = encode(snapshot)?;
    let mut file = fs::File::create(path)?;
    file.write_all(&bytes)?;
    Ok(())
}

/// Read a binary checkpoint.
pub fn read_checkpoint(path: &Path) -> Result<SystemSnapshot> {
    let mut bytes = Vec::new();
    fs::File::open(path)?.read_to_end(&mut bytes)?;
    decode(&bytes)
}

// =============================================================================
// ASCII EXPORT
// =============================================================================

/// One particle in the ASCII export.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AsciiParticle {
    pub id: u64,
    pub position: Vec3,
    pub velocity: Vec3,
    pub mass: f32,
    pub age: f32,
    /// `None` for an infinite lifespan.
    pub lifespan: Option<f32>,
    pub state: ParticleState,
    pub collisions: u32,
}

/// JSON document written by [`write_ascii`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AsciiCheckpoint {
    pub system: String,
    pub frame: i64,
    pub next_id: u64,
    #[serde(default)]
    pub carries: Vec<f32>,
    pub particles: Vec<AsciiParticle>,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl AsciiCheckpoint {
    pub fn from_snapshot(system: &str, snapshot: &SystemSnapshot) -> Self {
        let d = &snapshot.data;
        let particles = (0..d.len())
            .map(|i| AsciiParticle {
                id: d.ids[i].0,
                position: d.positions[i],
                velocity: d.velocities[i],
                mass: d.masses[i],
                age: d.ages[i],
                lifespan: d.lifespans[i].is_finite().then_some(d.lifespans[i]),
                state: d.states[i],
                collisions: d.collisions[i],
            })
            .collect();
        Self {
            system: system.to_string(),
            frame: snapshot.frame,
            next_id: d.next_id,
            carries: snapshot.carries.clone(),
            particles,
            attributes: d.attributes.declarations().to_vec(),
            columns: d.attributes.columns().to_vec(),
        }
    }

    pub fn into_snapshot(self) -> Result<SystemSnapshot> {
        let n = self.particles.len();
        let mut data = ParticleData {
            next_id: self.next_id,
            ..ParticleData::default()
        };
        for p in self.particles {
            data.ids.push(ParticleId(p.id));
            data.positions.push(p.position);
            data.velocities.push(p.velocity);
            data.masses.push(p.mass);
            data.ages.push(p.age);
            data.lifespans.push(p.lifespan.unwrap_or(f32::INFINITY));
            data.states.push(p.state);
            data.collisions.push(p.collisions);
        }
        data.attributes = AttributeStore::from_parts(self.attributes, self.columns, n)?;
        data.validate()?;
        Ok(SystemSnapshot {
            frame: self.frame,
            data,
            carries: self.carries,
        })
    }
}

/// Write an ASCII (JSON) checkpoint.
pub fn write_ascii(path: &Path, system: &str, snapshot: &SystemSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(&AsciiCheckpoint::from_snapshot(system, snapshot))?;
    fs::write(path, json)?;
    Ok(())
}

/// Read an ASCII (JSON) checkpoint.
pub fn read_ascii(path: &Path) -> Result<SystemSnapshot> {
    let json = fs::read_to_string(path)?;
    let doc: AsciiCheckpoint = serde_json::from_str(&json)?;
    doc.into_snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeValue;
    use crate::system::{ParticleSystem, SystemConfig};

    fn snapshot(frame: i64) -> SystemSnapshot {
        let mut system = ParticleSystem::new("s", SystemConfig::new()).unwrap();
        system
            .add_particles(
                &[Vec3::new(0.1, 0.2, 0.3), Vec3::new(-1.0, 1e-7, 3.5)],
                &[Vec3::X, Vec3::new(0.0, -9.8, 0.0)],
            )
            .unwrap();
        system
            .declare_attribute("heat", AttributeKind::Float, Some(AttributeValue::Float(0.25)))
            .unwrap();
        system.declare_attribute("tint", AttributeKind::Vector, None).unwrap();
        system.snapshot(frame)
    }

    #[test]
    fn test_cache_round_trip() {
        let mut cache = FrameCache::new();
        let s = snapshot(3);
        cache.save(s.clone());
        assert_eq!(cache.load(3), Some(&s));
        assert!(cache.load(4).is_none());
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let mut cache = FrameCache::new();
        for f in 1..=5 {
            cache.save(snapshot(f));
        }
        cache.truncate(2);
        let once: Vec<i64> = cache.frames().collect();
        cache.truncate(2);
        let twice: Vec<i64> = cache.frames().collect();
        assert_eq!(once, vec![1, 2]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_latest_at_or_before() {
        let mut cache = FrameCache::new();
        cache.save(snapshot(2));
        cache.save(snapshot(6));
        assert_eq!(cache.latest_at_or_before(5).map(|s| s.frame), Some(2));
        assert_eq!(cache.latest_at_or_before(6).map(|s| s.frame), Some(6));
        assert!(cache.latest_at_or_before(1).is_none());
    }

    #[test]
    fn test_binary_is_bit_exact() {
        let s = snapshot(7);
        let back = decode(&encode(&s).unwrap()).unwrap();
        assert_eq!(back, s);
        for (a, b) in back.data.positions.iter().zip(&s.data.positions) {
            assert_eq!(a.to_array().map(f32::to_bits), b.to_array().map(f32::to_bits));
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"NOTACHECKPOINT"), Err(DynamicsError::CheckpointFormat(_))));
        let mut bytes = encode(&snapshot(1)).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(decode(&bytes), Err(DynamicsError::CheckpointFormat(_))));
    }

    #[test]
    fn test_decode_rejects_overflowing_particle_count() {
        let mut bytes = encode(&snapshot(1)).unwrap();
        let record = std::mem::size_of::<CheckpointParticle>();
        // Largest count whose byte size still fits in usize.
        let count = (usize::MAX / record) as u64;
        let at = MAGIC.len() + 4 + 8;
        bytes[at..at + 8].copy_from_slice(&count.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(DynamicsError::CheckpointFormat(_))));
    }

    #[test]
    fn test_ascii_maps_infinite_lifespan_to_null() {
        let s = snapshot(1);
        let doc = AsciiCheckpoint::from_snapshot("s", &s);
        assert!(doc.particles.iter().all(|p| p.lifespan.is_none()));
        let json = serde_json::to_string(&doc).unwrap();
        let back: AsciiCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_snapshot().unwrap(), s);
    }

    #[test]
    fn test_checkpoint_files() {
        let dir = tempfile::tempdir().unwrap();
        let s = snapshot(12);
        let bin = checkpoint_path(dir.path(), "s", 12, false);
        let txt = checkpoint_path(dir.path(), "s", 12, true);
        assert!(bin.ends_with("s.12.pdc"));
        write_checkpoint(&bin, &s).unwrap();
        write_ascii(&txt, "s", &s).unwrap();
        assert_eq!(read_checkpoint(&bin).unwrap(), s);
        assert_eq!(read_ascii(&txt).unwrap(), s);
    }
}
