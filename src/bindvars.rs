//! `BindVars` — the batch-binding runtime surface.
//!
//! A `BindVars` carries the record-backed extractors a compiled template's
//! bind program registered, plus at most one `RecordListener` and one
//! `BatchListener`. Its `Handle` accepts a record, runs each extractor in
//! slot order, and delivers the resulting parameter list to the batch
//! listener.

use std::any::Any;
use std::sync::Mutex;

use crate::bind::PositionalParameter;
use crate::compile::CompiledTemplate;
use crate::error::{Result, TemplateError};
use crate::schema::Extractor;

/// Observes each record before its extractors run.
pub trait RecordListener: Send + Sync {
    fn on_record(&self, record: &dyn Any);
}

/// Receives the parameter list produced for one record.
pub trait BatchListener: Send + Sync {
    fn on_batch(&self, params: &[PositionalParameter]);
}

/// Batch-binding surface seeded from a `CompiledTemplate`'s registered
/// record extractors. One `BindVars` is typically reused across many
/// records sharing the same compiled shape.
pub struct BindVars {
    extractors: Vec<(usize, Extractor)>,
    record_listener: Mutex<Option<Box<dyn RecordListener>>>,
    batch_listener: Mutex<Option<Box<dyn BatchListener>>>,
}

impl BindVars {
    pub fn from_compiled(compiled: &CompiledTemplate) -> Self {
        BindVars {
            extractors: compiled.record_extractors(),
            record_listener: Mutex::new(None),
            batch_listener: Mutex::new(None),
        }
    }

    /// Sets the record listener. A second call is a `StateError`.
    pub fn set_record_listener(&self, listener: impl RecordListener + 'static) -> Result<()> {
        let mut slot = self.record_listener.lock().unwrap();
        if slot.is_some() {
            return Err(TemplateError::state("record listener already set"));
        }
        *slot = Some(Box::new(listener));
        Ok(())
    }

    /// Sets the batch listener. A second call is a `StateError`.
    pub fn set_batch_listener(&self, listener: impl BatchListener + 'static) -> Result<()> {
        let mut slot = self.batch_listener.lock().unwrap();
        if slot.is_some() {
            return Err(TemplateError::state("batch listener already set"));
        }
        *slot = Some(Box::new(listener));
        Ok(())
    }

    /// Returns the one-argument binding handle: given a record, it invokes
    /// every registered extractor in slot order, notifies the record
    /// listener (if any), and delivers the parameter list to the batch
    /// listener. Errors if no batch listener was set or the template
    /// registered no extractors at all.
    pub fn handle(&self, record: &dyn Any) -> Result<Vec<PositionalParameter>> {
        if self.extractors.is_empty() {
            return Err(TemplateError::state(
                "BindVars handle invoked with no registered extractors",
            ));
        }

        {
            let listener = self.record_listener.lock().unwrap();
            if let Some(listener) = listener.as_ref() {
                listener.on_record(record);
            }
        }

        let mut params = Vec::with_capacity(self.extractors.len());
        for (i, (_, extractor)) in self.extractors.iter().enumerate() {
            let value = extractor(record).map_err(|e| {
                TemplateError::RuntimeWrap(format!("extractor failed during batch bind: {e}"))
            })?;
            params.push(PositionalParameter {
                index: i + 1,
                value,
                converter: None,
            });
        }

        let listener = self.batch_listener.lock().unwrap();
        match listener.as_ref() {
            Some(listener) => {
                listener.on_batch(&params);
                Ok(params)
            }
            None => Err(TemplateError::state(
                "BindVars handle invoked with no batch listener",
            )),
        }
    }
}
