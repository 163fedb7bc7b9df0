//! Class registry: name → compiled unit, plus hierarchy-walking lookups.
//!
//! Installed wholesale at load time and replaced atomically on reload.
//! Class names were interned case-folded, so lookup is case-insensitive by
//! construction.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    intern::StringId,
    unit::{CompiledConstant, CompiledFunction, CompiledUnit, CompiledVariable},
};

#[derive(Debug, Default)]
pub struct Registry {
    units: IndexMap<StringId, Rc<CompiledUnit>>,
}

impl Registry {
    #[must_use]
    pub fn new(units: Vec<CompiledUnit>) -> Self {
        let mut map = IndexMap::new();
        for unit in units {
            map.insert(unit.name, Rc::new(unit));
        }
        Self { units: map }
    }

    #[must_use]
    pub fn get(&self, name: StringId) -> Option<&Rc<CompiledUnit>> {
        self.units.get(&name)
    }

    /// Units in load order (the introspection handler iterates this).
    pub fn units(&self) -> impl Iterator<Item = &Rc<CompiledUnit>> {
        self.units.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// First function named `name` along `unit`'s linearised hierarchy.
    #[must_use]
    pub fn resolve_func(
        &self,
        unit: &CompiledUnit,
        name: StringId,
    ) -> Option<(Rc<CompiledUnit>, CompiledFunction)> {
        for &cls in &unit.linear {
            if let Some(u) = self.units.get(&cls) {
                if let Some(f) = u.func(name) {
                    return Some((Rc::clone(u), f.clone()));
                }
            }
        }
        None
    }

    /// First variable named `name` along the hierarchy, with its defining
    /// class.
    #[must_use]
    pub fn resolve_var(
        &self,
        unit: &CompiledUnit,
        name: StringId,
    ) -> Option<(StringId, CompiledVariable)> {
        for &cls in &unit.linear {
            if let Some(u) = self.units.get(&cls) {
                if let Some(v) = u.var(name) {
                    return Some((cls, v.clone()));
                }
            }
        }
        None
    }

    /// First constant named `name` along the hierarchy.
    #[must_use]
    pub fn resolve_const(
        &self,
        unit: &CompiledUnit,
        name: StringId,
    ) -> Option<(StringId, CompiledConstant)> {
        for &cls in &unit.linear {
            if let Some(u) = self.units.get(&cls) {
                if let Some(c) = u.constant(name) {
                    return Some((cls, c.clone()));
                }
            }
        }
        None
    }

    /// Classes that list `base` anywhere in their ancestry (excluding the
    /// base itself), in load order.
    #[must_use]
    pub fn derived_from(&self, base: StringId) -> Vec<StringId> {
        self.units
            .values()
            .filter(|u| u.name != base && u.linear.contains(&base))
            .map(|u| u.name)
            .collect()
    }
}
