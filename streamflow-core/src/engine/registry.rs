use super::ProcessingContext;
use crate::error::ProcessingError;
use crate::record::{Intent, Record, ValueType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Handles one `(value type, intent)` pair of commands.
pub trait CommandProcessor: Send + Sync {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError>;
}

/// Routing table from `(value type, intent)` to the owning processor.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<(ValueType, Intent), Arc<dyn CommandProcessor>>,
    /// Commands only the engine itself writes: follow-ups and scheduled work.
    internal: HashSet<(ValueType, Intent)>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I>(&mut self, intents: &[I], processor: Arc<dyn CommandProcessor>)
    where
        I: Into<Intent> + Copy,
    {
        for intent in intents {
            let intent: Intent = (*intent).into();
            self.processors
                .insert((intent.value_type(), intent), processor.clone());
        }
    }

    /// Registers commands that clients may not write.
    pub fn register_internal<I>(&mut self, intents: &[I], processor: Arc<dyn CommandProcessor>)
    where
        I: Into<Intent> + Copy,
    {
        self.register(intents, processor);
        for intent in intents {
            let intent: Intent = (*intent).into();
            self.internal.insert((intent.value_type(), intent));
        }
    }

    pub fn is_internal(&self, value_type: ValueType, intent: Intent) -> bool {
        self.internal.contains(&(value_type, intent))
    }

    pub fn get(&self, value_type: ValueType, intent: Intent) -> Option<&Arc<dyn CommandProcessor>> {
        self.processors.get(&(value_type, intent))
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .processors
            .keys()
            .map(|(value_type, intent)| format!("{value_type}:{intent}"))
            .collect();
        keys.sort();
        f.debug_struct("ProcessorRegistry").field("processors", &keys).finish()
    }
}
