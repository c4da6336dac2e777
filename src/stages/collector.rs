//! Collector: sink storing every received element.

use crate::pipeline::context::StageContext;
use crate::pipeline::port::InputPort;
use crate::pipeline::stage::Stage;
use std::sync::{Arc, Mutex, MutexGuard};

/// Elements gathered by a [`Collector`], readable from any thread.
#[derive(Debug)]
pub struct Collected<T> {
    elements: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Collected<T> {
    fn clone(&self) -> Self {
        Self {
            elements: self.elements.clone(),
        }
    }
}

impl<T> Collected<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.elements.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Moves the collected elements out, leaving the collection empty.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.lock())
    }
}

impl<T: Clone> Collected<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.lock().clone()
    }
}

/// Sink stage appending every element of its input port to a shared list.
pub struct Collector<T> {
    input: InputPort<T>,
    collected: Collected<T>,
}

impl<T: Send + 'static> Collector<T> {
    pub fn new(input: InputPort<T>) -> Self {
        Self {
            input,
            collected: Collected {
                elements: Arc::new(Mutex::new(Vec::new())),
            },
        }
    }

    /// Handle to the elements this collector will gather.
    pub fn collected(&self) -> Collected<T> {
        self.collected.clone()
    }
}

impl<T: Send + 'static> Stage for Collector<T> {
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> anyhow::Result<()> {
        while let Some(element) = ctx.receive(self.input)? {
            self.collected.lock().push(element);
        }
        Ok(())
    }
}
