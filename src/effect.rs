//! Effect descriptors: the immutable description of one render pass.

use crate::error::{Result, VglError};
use crate::shader::ShaderSource;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

/// Scalar type of an attribute or uniform component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Float,
    Int,
}

/// Static per-vertex data for one shader input.
#[derive(Debug, Clone)]
pub struct AttributeSpec {
    pub name: String,
    pub component_count: u8,
    pub component_type: ComponentType,
    pub data: Vec<f32>,
}

impl AttributeSpec {
    pub fn float(name: impl Into<String>, component_count: u8, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            component_count,
            component_type: ComponentType::Float,
            data,
        }
    }

    /// Number of vertices described by `data`.
    pub fn vertex_count(&self) -> u32 {
        (self.data.len() / self.component_count.max(1) as usize) as u32
    }
}

/// Live uniform values.
///
/// Cloning shares the underlying storage, so a caller holding a clone can
/// change the values between frames and every draw reads the latest ones.
#[derive(Clone, Default)]
pub struct UniformData(Rc<RefCell<Vec<f32>>>);

impl UniformData {
    pub fn new(values: Vec<f32>) -> Self {
        Self(Rc::new(RefCell::new(values)))
    }

    pub fn get(&self) -> Ref<'_, Vec<f32>> {
        self.0.borrow()
    }

    pub fn set(&self, values: impl Into<Vec<f32>>) {
        *self.0.borrow_mut() = values.into();
    }

    /// True when both handles point at the same storage.
    pub fn shares_storage(&self, other: &UniformData) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for UniformData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UniformData").field(&*self.0.borrow()).finish()
    }
}

impl From<Vec<f32>> for UniformData {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A named shader constant fed from live data.
#[derive(Debug, Clone)]
pub struct UniformSpec {
    pub name: String,
    pub component_count: u8,
    pub component_type: ComponentType,
    pub data: UniformData,
}

impl UniformSpec {
    pub fn float(name: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            // saturates so validation rejects oversized blocks
            component_count: u8::try_from(values.len()).unwrap_or(u8::MAX),
            component_type: ComponentType::Float,
            data: UniformData::new(values),
        }
    }
}

/// Description of one effect pass.
#[derive(Debug, Clone)]
pub struct EffectDescriptor {
    /// Human-readable label used in logs
    pub name: Option<String>,
    pub vertex_source: ShaderSource,
    pub fragment_source: ShaderSource,
    pub attributes: Vec<AttributeSpec>,
    pub uniforms: Vec<UniformSpec>,
}

impl EffectDescriptor {
    /// Looks up a uniform by name.
    pub fn uniform(&self, name: &str) -> Option<&UniformSpec> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("effect")
    }

    /// Rejects layouts the executor cannot draw.
    pub fn validate(&self) -> Result<()> {
        for attr in &self.attributes {
            if !(1..=4).contains(&attr.component_count) {
                return Err(VglError::InvalidDescriptor(format!(
                    "attribute `{}` has {} components, expected 1 to 4",
                    attr.name, attr.component_count
                )));
            }
            if attr.data.len() % attr.component_count as usize != 0 {
                return Err(VglError::InvalidDescriptor(format!(
                    "attribute `{}` holds {} values, not a multiple of {}",
                    attr.name,
                    attr.data.len(),
                    attr.component_count
                )));
            }
        }
        for uniform in &self.uniforms {
            if !(1..=4).contains(&uniform.component_count) {
                return Err(VglError::InvalidDescriptor(format!(
                    "uniform `{}` has {} components, expected 1 to 4",
                    uniform.name, uniform.component_count
                )));
            }
        }
        Ok(())
    }
}
