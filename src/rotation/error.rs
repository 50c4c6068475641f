use std::fmt;

/// Failures accumulated across secret types or realms during one pass.
///
/// Rotation keeps going after a failure; the caller sees every error at once.
#[derive(Debug, Default)]
pub struct RotationErrors {
    errors: Vec<anyhow::Error>,
}

impl RotationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: anyhow::Error) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: Self) {
        self.errors.extend(other.errors);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// One line per error, context chain included.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| format!("{e:#}")).collect()
    }

    /// `Ok(())` when nothing failed.
    ///
    /// # Errors
    /// Returns `self` when at least one error was collected.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<anyhow::Error> for RotationErrors {
    fn from(error: anyhow::Error) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for RotationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rotation error(s) occurred", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n\t* {error:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RotationErrors {}
