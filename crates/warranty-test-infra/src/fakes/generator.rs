use std::collections::HashMap;
use warranty_core::BarcodeCode;
use warranty_generator::{GenerationRequest, Generator, SeqGenerator};

/// Generator that returns fixed codes for chosen counters and defers to
/// [`SeqGenerator`] otherwise.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    scripted: HashMap<u32, BarcodeCode>,
    fallback: SeqGenerator,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `code` whenever the request carries `counter`.
    pub fn script(mut self, counter: u32, code: &str) -> Self {
        self.scripted
            .insert(counter, BarcodeCode::new_unchecked(code));
        self
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> BarcodeCode {
        match self.scripted.get(&request.counter) {
            Some(code) => code.clone(),
            None => self.fallback.generate(request),
        }
    }
}
