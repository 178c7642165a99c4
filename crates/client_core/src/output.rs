use shared::domain::OutputFragment;
use tracing::warn;

/// Code history plus the transcript of every run's output, split by dividers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputLog {
    history: Vec<String>,
    fragments: Vec<OutputFragment>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_history(&mut self, code: Option<&str>) -> bool {
        match code {
            Some(code) if !code.is_empty() => {
                self.history.push(code.to_string());
                true
            }
            _ => false,
        }
    }

    /// Replaces the whole log. An absent payload is ignored; an empty one clears it.
    pub fn set_output(&mut self, output: Option<Vec<OutputFragment>>) -> bool {
        match output {
            Some(output) => {
                self.fragments = output;
                true
            }
            None => false,
        }
    }

    /// Appends one run's fragments followed by a single divider. Batches that carry
    /// their own dividers are rejected whole.
    pub fn append_output(&mut self, output: Option<Vec<OutputFragment>>) -> bool {
        match output {
            Some(output) if output.iter().any(OutputFragment::is_divider) => {
                warn!(fragments = output.len(), "output: rejecting batch containing a divider");
                false
            }
            Some(output) if !output.is_empty() => {
                self.fragments.extend(output);
                self.fragments.push(OutputFragment::Divider);
                true
            }
            _ => false,
        }
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn fragments(&self) -> &[OutputFragment] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments of each completed run, without the closing divider.
    pub fn runs(&self) -> impl Iterator<Item = &[OutputFragment]> + '_ {
        let end = self
            .fragments
            .iter()
            .rposition(OutputFragment::is_divider)
            .map_or(0, |last| last + 1);
        let complete = &self.fragments[..end];
        let run_count = complete.iter().filter(|f| f.is_divider()).count();
        complete.split(OutputFragment::is_divider).take(run_count)
    }
}
