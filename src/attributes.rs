//! Per-particle attribute columns.
//!
//! Custom attributes are declared at runtime by name and stored as one typed
//! column per attribute. Every column always holds exactly one value per
//! particle in the owning system; [`AttributeStore`] enforces that by
//! growing and compacting all columns together.
//!
//! # Typed bundles
//!
//! `#[derive(Attributes)]` turns a plain struct into a bundle that can be
//! declared on a system and written or read in one call:
//!
//! ```ignore
//! #[derive(Attributes, Clone, Debug, PartialEq)]
//! struct Spark {
//!     energy: f32,
//!     #[attribute(name = "rgbPP")]
//!     color: Vec3,
//!     generation: u32,
//! }
//!
//! system.declare_attributes::<Spark>()?;
//! system.write_attributes(id, &spark)?;
//! let back: Spark = system.read_attributes(id)?;
//! ```

use crate::error::{DynamicsError, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value type of an attribute column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// One `f32` per particle.
    Float,
    /// One `i32` per particle.
    Int,
    /// One `Vec3` per particle.
    Vector,
}

impl AttributeKind {
    /// Human-readable type name.
    pub fn name(&self) -> &'static str {
        match self {
            AttributeKind::Float => "float",
            AttributeKind::Int => "int",
            AttributeKind::Vector => "vector",
        }
    }

    /// Zero value of this kind.
    pub fn zero(&self) -> AttributeValue {
        match self {
            AttributeKind::Float => AttributeValue::Float(0.0),
            AttributeKind::Int => AttributeValue::Int(0),
            AttributeKind::Vector => AttributeValue::Vector(Vec3::ZERO),
        }
    }
}

/// A single attribute value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Float(f32),
    Int(i32),
    Vector(Vec3),
}

impl AttributeValue {
    /// Kind of this value.
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Float(_) => AttributeKind::Float,
            AttributeValue::Int(_) => AttributeKind::Int,
            AttributeValue::Vector(_) => AttributeKind::Vector,
        }
    }

    fn mismatch(&self, name: &str, expected: AttributeKind) -> DynamicsError {
        DynamicsError::AttributeTypeMismatch {
            name: name.to_string(),
            expected: expected.name(),
            actual: self.kind().name(),
        }
    }

    /// Extract an `f32`, failing with a type mismatch naming `name`.
    pub fn as_float(&self, name: &str) -> Result<f32> {
        match self {
            AttributeValue::Float(v) => Ok(*v),
            other => Err(other.mismatch(name, AttributeKind::Float)),
        }
    }

    /// Extract an `i32`.
    pub fn as_int(&self, name: &str) -> Result<i32> {
        match self {
            AttributeValue::Int(v) => Ok(*v),
            other => Err(other.mismatch(name, AttributeKind::Int)),
        }
    }

    /// Extract a `Vec3`.
    pub fn as_vector(&self, name: &str) -> Result<Vec3> {
        match self {
            AttributeValue::Vector(v) => Ok(*v),
            other => Err(other.mismatch(name, AttributeKind::Vector)),
        }
    }
}

impl From<f32> for AttributeValue {
    fn from(v: f32) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Int(v as i32)
    }
}

impl From<Vec3> for AttributeValue {
    fn from(v: Vec3) -> Self {
        AttributeValue::Vector(v)
    }
}

/// Conversion from a stored value back to a Rust field type.
///
/// Implemented for the field types `#[derive(Attributes)]` supports.
pub trait FromAttribute: Sized {
    /// Column kind used to store this type.
    const KIND: AttributeKind;
    /// Convert, reporting `name` on mismatch.
    fn from_attribute(value: AttributeValue, name: &str) -> Result<Self>;
}

impl FromAttribute for f32 {
    const KIND: AttributeKind = AttributeKind::Float;
    fn from_attribute(value: AttributeValue, name: &str) -> Result<Self> {
        value.as_float(name)
    }
}

impl FromAttribute for i32 {
    const KIND: AttributeKind = AttributeKind::Int;
    fn from_attribute(value: AttributeValue, name: &str) -> Result<Self> {
        value.as_int(name)
    }
}

impl FromAttribute for u32 {
    const KIND: AttributeKind = AttributeKind::Int;
    fn from_attribute(value: AttributeValue, name: &str) -> Result<Self> {
        value.as_int(name).map(|v| v as u32)
    }
}

impl FromAttribute for Vec3 {
    const KIND: AttributeKind = AttributeKind::Vector;
    fn from_attribute(value: AttributeValue, name: &str) -> Result<Self> {
        value.as_vector(name)
    }
}

/// Trait implemented by `#[derive(Attributes)]`.
///
/// Bridges a plain Rust struct to a set of named attribute columns.
pub trait Attributes: Sized {
    /// Column names and kinds, in field order.
    const SCHEMA: &'static [(&'static str, AttributeKind)];

    /// Values of every field, paired with their column names.
    fn to_values(&self) -> Vec<(&'static str, AttributeValue)>;

    /// Rebuild from a column lookup. Missing columns fail with
    /// [`DynamicsError::AttributeNotFound`].
    fn from_values(lookup: &dyn Fn(&str) -> Option<AttributeValue>) -> Result<Self>;
}

/// One typed column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Column {
    Float(Vec<f32>),
    Int(Vec<i32>),
    Vector(Vec<Vec3>),
}

impl Column {
    fn with_len(kind: AttributeKind, len: usize, fill: AttributeValue) -> Self {
        match (kind, fill) {
            (AttributeKind::Float, AttributeValue::Float(v)) => Column::Float(vec![v; len]),
            (AttributeKind::Int, AttributeValue::Int(v)) => Column::Int(vec![v; len]),
            (AttributeKind::Vector, AttributeValue::Vector(v)) => Column::Vector(vec![v; len]),
            (kind, _) => Column::with_len(kind, len, kind.zero()),
        }
    }

    /// Kind of values stored.
    pub fn kind(&self) -> AttributeKind {
        match self {
            Column::Float(_) => AttributeKind::Float,
            Column::Int(_) => AttributeKind::Int,
            Column::Vector(_) => AttributeKind::Vector,
        }
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Vector(v) => v.len(),
        }
    }

    /// Whether the column is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index`.
    pub fn get(&self, index: usize) -> Option<AttributeValue> {
        match self {
            Column::Float(v) => v.get(index).map(|x| AttributeValue::Float(*x)),
            Column::Int(v) => v.get(index).map(|x| AttributeValue::Int(*x)),
            Column::Vector(v) => v.get(index).map(|x| AttributeValue::Vector(*x)),
        }
    }

    fn set(&mut self, index: usize, value: AttributeValue, name: &str) -> Result<()> {
        match (self, value) {
            (Column::Float(v), AttributeValue::Float(x)) => v[index] = x,
            (Column::Int(v), AttributeValue::Int(x)) => v[index] = x,
            (Column::Vector(v), AttributeValue::Vector(x)) => v[index] = x,
            (col, value) => return Err(value.mismatch(name, col.kind())),
        }
        Ok(())
    }

    fn push(&mut self, value: AttributeValue) {
        match (self, value) {
            (Column::Float(v), AttributeValue::Float(x)) => v.push(x),
            (Column::Int(v), AttributeValue::Int(x)) => v.push(x),
            (Column::Vector(v), AttributeValue::Vector(x)) => v.push(x),
            (Column::Float(v), _) => v.push(0.0),
            (Column::Int(v), _) => v.push(0),
            (Column::Vector(v), _) => v.push(Vec3::ZERO),
        }
    }

    fn retain_mask(&mut self, keep: &[bool]) {
        fn retain<T>(values: &mut Vec<T>, keep: &[bool]) {
            let mut i = 0;
            values.retain(|_| {
                let k = keep[i];
                i += 1;
                k
            });
        }
        match self {
            Column::Float(v) => retain(v, keep),
            Column::Int(v) => retain(v, keep),
            Column::Vector(v) => retain(v, keep),
        }
    }
}

/// Declaration of one custom attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeDecl {
    /// Column name.
    pub name: String,
    /// Value kind.
    pub kind: AttributeKind,
    /// Value given to newly created particles.
    pub default: AttributeValue,
}

/// Schema registry plus the columns it describes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AttributeStore {
    decls: Vec<AttributeDecl>,
    columns: Vec<Column>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    len: usize,
}

impl PartialEq for AttributeStore {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.decls == other.decls && self.columns == other.columns
    }
}

impl AttributeStore {
    /// Empty store with no particles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of particles (rows).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Declared attributes in declaration order.
    pub fn declarations(&self) -> &[AttributeDecl] {
        &self.decls
    }

    /// Whether `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        if self.index.len() == self.decls.len() {
            self.index.get(name).copied()
        } else {
            // Index is not serialized; fall back to a scan after deserializing.
            self.decls.iter().position(|d| d.name == name)
        }
    }

    /// Rebuild the name index (after deserializing).
    pub fn reindex(&mut self) {
        self.index = self
            .decls
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
    }

    /// Declare an attribute. Existing particles get `default`.
    ///
    /// Redeclaring with the same kind is a no-op; a different kind fails.
    pub fn declare(&mut self, name: &str, kind: AttributeKind, default: Option<AttributeValue>) -> Result<()> {
        if let Some(i) = self.position(name) {
            return if self.decls[i].kind == kind {
                Ok(())
            } else {
                Err(DynamicsError::AttributeExists(name.to_string()))
            };
        }
        let default = match default {
            Some(v) if v.kind() == kind => v,
            Some(v) => return Err(v.mismatch(name, kind)),
            None => kind.zero(),
        };
        self.columns.push(Column::with_len(kind, self.len, default));
        self.decls.push(AttributeDecl {
            name: name.to_string(),
            kind,
            default,
        });
        self.index.insert(name.to_string(), self.decls.len() - 1);
        Ok(())
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.position(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| DynamicsError::AttributeNotFound(name.to_string()))
    }

    fn column_mut(&mut self, name: &str) -> Result<&mut Column> {
        match self.position(name) {
            Some(i) => Ok(&mut self.columns[i]),
            None => Err(DynamicsError::AttributeNotFound(name.to_string())),
        }
    }

    /// Float column slice.
    pub fn floats(&self, name: &str) -> Result<&[f32]> {
        match self.column(name)? {
            Column::Float(v) => Ok(v),
            other => Err(other.kind().zero().mismatch(name, AttributeKind::Float)),
        }
    }

    /// Mutable float column slice.
    pub fn floats_mut(&mut self, name: &str) -> Result<&mut [f32]> {
        match self.column_mut(name)? {
            Column::Float(v) => Ok(v),
            other => Err(other.kind().zero().mismatch(name, AttributeKind::Float)),
        }
    }

    /// Vector column slice.
    pub fn vectors(&self, name: &str) -> Result<&[Vec3]> {
        match self.column(name)? {
            Column::Vector(v) => Ok(v),
            other => Err(other.kind().zero().mismatch(name, AttributeKind::Vector)),
        }
    }

    /// Mutable vector column slice.
    pub fn vectors_mut(&mut self, name: &str) -> Result<&mut [Vec3]> {
        match self.column_mut(name)? {
            Column::Vector(v) => Ok(v),
            other => Err(other.kind().zero().mismatch(name, AttributeKind::Vector)),
        }
    }

    /// Int column slice.
    pub fn ints(&self, name: &str) -> Result<&[i32]> {
        match self.column(name)? {
            Column::Int(v) => Ok(v),
            other => Err(other.kind().zero().mismatch(name, AttributeKind::Int)),
        }
    }

    /// Value of `name` at row `index`.
    pub fn get(&self, name: &str, index: usize) -> Result<AttributeValue> {
        let column = self.column(name)?;
        column
            .get(index)
            .ok_or_else(|| DynamicsError::not_found(crate::error::EntityKind::Particle, index))
    }

    /// Set `name` at row `index`.
    pub fn set(&mut self, name: &str, index: usize, value: AttributeValue) -> Result<()> {
        if index >= self.len {
            return Err(DynamicsError::not_found(crate::error::EntityKind::Particle, index));
        }
        self.column_mut(name)?.set(index, value, name)
    }

    /// Append one row filled with each attribute's default.
    pub fn push_default(&mut self) {
        for (col, decl) in self.columns.iter_mut().zip(&self.decls) {
            col.push(decl.default);
        }
        self.len += 1;
    }

    /// Keep only rows where `keep[i]` is true.
    pub fn retain(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.len);
        for col in &mut self.columns {
            col.retain_mask(keep);
        }
        self.len = keep.iter().filter(|k| **k).count();
    }

    /// Raw columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Rebuild a store from declarations and columns, validating lengths.
    pub fn from_parts(decls: Vec<AttributeDecl>, columns: Vec<Column>, len: usize) -> Result<Self> {
        if decls.len() != columns.len() {
            return Err(DynamicsError::CheckpointFormat(format!(
                "{} attribute declarations but {} columns",
                decls.len(),
                columns.len()
            )));
        }
        for (decl, col) in decls.iter().zip(&columns) {
            if col.len() != len || col.kind() != decl.kind {
                return Err(DynamicsError::CheckpointFormat(format!(
                    "column '{}' has {} {} values, expected {} {}",
                    decl.name,
                    col.len(),
                    col.kind().name(),
                    len,
                    decl.kind.name()
                )));
            }
        }
        let mut store = Self {
            decls,
            columns,
            index: HashMap::new(),
            len,
        };
        store.reindex();
        Ok(store)
    }
}
