//! Ordered set of variables being logged
//!
//! Registration order matters: it is the order reads happen within a tick,
//! the column order of wide exports and the tie-break for long exports.

use crate::error::{LoggerError, Result};
use crate::types::VariableDescriptor;

#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: Vec<VariableDescriptor>,
    /// Set while a polling session is Running
    frozen: bool,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable at the end of the list
    pub fn add(&mut self, variable: VariableDescriptor) -> Result<()> {
        if self.frozen {
            return Err(LoggerError::AdditionWhileRunning(variable));
        }
        if self.contains(&variable) {
            return Err(LoggerError::DuplicateVariable(variable));
        }
        self.variables.push(variable);
        Ok(())
    }

    /// Unregister a variable, keeping the order of the others
    pub fn remove(&mut self, variable: &VariableDescriptor) -> Result<()> {
        if self.frozen {
            return Err(LoggerError::RemovalWhileRunning(*variable));
        }
        let idx = self
            .position(variable)
            .ok_or(LoggerError::NotFound(*variable))?;
        self.variables.remove(idx);
        Ok(())
    }

    pub fn list(&self) -> &[VariableDescriptor] {
        &self.variables
    }

    pub fn contains(&self, variable: &VariableDescriptor) -> bool {
        self.variables.contains(variable)
    }

    /// Registration index of a variable
    pub fn position(&self, variable: &VariableDescriptor) -> Option<usize> {
        self.variables.iter().position(|v| v == variable)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Lock the set against changes for the duration of a Running session
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Register every variable not yet known, preserving the given order
    ///
    /// Used after a journal replay so the variables of a crashed run come back.
    /// Returns how many were added.
    pub fn restore_from<'a>(
        &mut self,
        variables: impl IntoIterator<Item = &'a VariableDescriptor>,
    ) -> usize {
        let mut added = 0;
        for var in variables {
            if !self.contains(var) {
                self.variables.push(*var);
                added += 1;
            }
        }
        added
    }
}
