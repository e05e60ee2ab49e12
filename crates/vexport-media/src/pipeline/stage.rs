//! Stage variants and the capability traits behind them.

use std::fmt;
use std::sync::Arc;

use super::PipelineError;

/// Error type returned by user-supplied stage code.
pub type StageError = Box<dyn std::error::Error + Send + Sync + 'static>;

type StageFn<T> = dyn Fn(T) -> Result<T, StageError> + Send + Sync;
type Predicate<T> = dyn Fn(&T) -> bool + Send + Sync;

/// A single-argument transformation.
pub trait Transform<T>: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, input: T) -> Result<T, StageError>;
}

/// A transformation backed by a media operation (cut, concat, ...).
pub trait MediaStage<T>: Transform<T> {
    /// Short operation label used in logs and metrics.
    fn operation(&self) -> &'static str;
}

/// One unit of a [`Pipeline`](super::Pipeline).
pub enum ProcessingStage<T> {
    /// A plain function or closure.
    Function { name: String, f: Arc<StageFn<T>> },
    /// Any [`Transform`] implementor.
    Transform(Arc<dyn Transform<T>>),
    /// Passes the payload through unchanged or rejects it.
    Filter {
        name: String,
        predicate: Arc<Predicate<T>>,
    },
    /// Child stages applied in order as one named unit.
    Composite {
        name: String,
        children: Vec<ProcessingStage<T>>,
    },
    /// A media operation.
    Media(Arc<dyn MediaStage<T>>),
}

impl<T> ProcessingStage<T> {
    pub fn function<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(T) -> Result<T, StageError> + Send + Sync + 'static,
    {
        Self::Function {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn transform(transform: impl Transform<T> + 'static) -> Self {
        Self::Transform(Arc::new(transform))
    }

    pub fn filter<P>(name: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::Filter {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn composite(name: impl Into<String>, children: Vec<ProcessingStage<T>>) -> Self {
        Self::Composite {
            name: name.into(),
            children,
        }
    }

    pub fn media(stage: impl MediaStage<T> + 'static) -> Self {
        Self::Media(Arc::new(stage))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Function { name, .. } | Self::Filter { name, .. } | Self::Composite { name, .. } => {
                name
            }
            Self::Transform(t) => t.name(),
            Self::Media(m) => m.name(),
        }
    }

    /// Label for the stage kind, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Function { .. } => "function",
            Self::Transform(_) => "transform",
            Self::Filter { .. } => "filter",
            Self::Composite { .. } => "composite",
            Self::Media(m) => m.operation(),
        }
    }

    /// Apply the stage to one payload.
    ///
    /// Composite stages stop at the first failing child; the error names
    /// that child.
    pub fn apply(&self, input: T) -> Result<T, PipelineError> {
        match self {
            Self::Function { name, f } => f(input).map_err(|source| PipelineError::stage(name, source)),
            Self::Transform(t) => t
                .apply(input)
                .map_err(|source| PipelineError::stage(t.name(), source)),
            Self::Filter { name, predicate } => {
                if predicate(&input) {
                    Ok(input)
                } else {
                    Err(PipelineError::Filtered { stage: name.clone() })
                }
            }
            Self::Composite { children, .. } => children
                .iter()
                .try_fold(input, |value, child| child.apply(value)),
            Self::Media(m) => m
                .apply(input)
                .map_err(|source| PipelineError::stage(m.name(), source)),
        }
    }
}

impl<T> Clone for ProcessingStage<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Function { name, f } => Self::Function {
                name: name.clone(),
                f: f.clone(),
            },
            Self::Transform(t) => Self::Transform(t.clone()),
            Self::Filter { name, predicate } => Self::Filter {
                name: name.clone(),
                predicate: predicate.clone(),
            },
            Self::Composite { name, children } => Self::Composite {
                name: name.clone(),
                children: children.clone(),
            },
            Self::Media(m) => Self::Media(m.clone()),
        }
    }
}

impl<T> fmt::Debug for ProcessingStage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingStage")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
