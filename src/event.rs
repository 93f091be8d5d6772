//! Decision responses and their serialized event form.
//!
//! A decision event is one JSON line written into a pooled [`DataBuffer`]:
//!
//! ```text
//! {"Version":"1","EventId":"ev1","a":[3,2,1],"c":{...},"p":[0.07,0.07,0.87],"VWState":{"m":"N/A"}}
//! ```
//!
//! `a` lists 1-based action ids in ranking order, `p` the matching
//! probabilities and `c` the caller's context verbatim. Outcome events are
//! `{"EventId":"ev1","v":<outcome>}` and are joined to decisions by event id.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::error::{LiveModelError, Result};
use crate::pool::PoolFactory;

/// Model id recorded for decisions made before any model was loaded.
pub const NO_MODEL_ID: &str = "N/A";

/// One entry of a ranking.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionProbability {
    pub action_id: usize,
    pub probability: f32,
}

/// Ranked actions with their probabilities and the chosen action.
///
/// The chosen action is always the first entry of the ranking.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingResponse {
    event_id: String,
    model_id: String,
    chosen_action_id: usize,
    ranking: Vec<ActionProbability>,
}

impl RankingResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a response from a pdf over actions `0..pdf.len()` with `chosen`
    /// leading the ranking.
    ///
    /// The chosen action and action 0 trade places; every other action keeps
    /// its index position:
    ///
    /// ```text
    /// pdf = [p0, p1, p2, p3], chosen = 2  =>  [(2,p2), (1,p1), (0,p0), (3,p3)]
    /// ```
    pub fn from_pdf(pdf: &[f32], chosen: usize) -> Result<Self> {
        if chosen >= pdf.len() {
            return Err(LiveModelError::Exploration(format!(
                "chosen action {chosen} outside {} actions",
                pdf.len()
            )));
        }
        let mut response = Self::new();
        response.ranking.reserve(pdf.len());
        response.push(chosen, pdf[chosen]);
        for index in 1..pdf.len() {
            let action = if index == chosen { 0 } else { index };
            response.push(action, pdf[action]);
        }
        response.set_chosen_action_id(chosen);
        Ok(response)
    }

    /// Append an action to the ranking.
    pub fn push(&mut self, action_id: usize, probability: f32) {
        self.ranking.push(ActionProbability {
            action_id,
            probability,
        });
    }

    pub fn clear(&mut self) {
        self.event_id.clear();
        self.model_id.clear();
        self.chosen_action_id = 0;
        self.ranking.clear();
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn set_event_id(&mut self, event_id: impl Into<String>) {
        self.event_id = event_id.into();
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn set_model_id(&mut self, model_id: impl Into<String>) {
        self.model_id = model_id.into();
    }

    pub fn chosen_action_id(&self) -> usize {
        self.chosen_action_id
    }

    pub fn set_chosen_action_id(&mut self, action_id: usize) {
        self.chosen_action_id = action_id;
    }

    pub fn ranking(&self) -> &[ActionProbability] {
        &self.ranking
    }

    pub fn len(&self) -> usize {
        self.ranking.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranking.is_empty()
    }

    /// Probability recorded for `action_id`, if it is ranked.
    pub fn probability_of(&self, action_id: usize) -> Option<f32> {
        self.ranking
            .iter()
            .find(|entry| entry.action_id == action_id)
            .map(|entry| entry.probability)
    }

    /// Check the structural invariants of a response over `action_count` actions.
    ///
    /// Every action id in `0..action_count` appears exactly once, probabilities
    /// are finite and non-negative and the chosen action leads the ranking.
    pub fn validate(&self, action_count: usize) -> Result<()> {
        if self.ranking.len() != action_count {
            return Err(LiveModelError::Exploration(format!(
                "ranking has {} entries, expected {action_count}",
                self.ranking.len()
            )));
        }
        if let Some(entry) = self.ranking.iter().find(|e| e.action_id >= action_count) {
            return Err(LiveModelError::Exploration(format!(
                "action {} is out of range",
                entry.action_id
            )));
        }
        self.check_well_formed()
    }

    /// Check the invariants that hold regardless of the action count: a
    /// non-empty ranking without repeated actions, finite non-negative
    /// probabilities and the chosen action first.
    pub fn check_well_formed(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for entry in &self.ranking {
            if !seen.insert(entry.action_id) {
                return Err(LiveModelError::Exploration(format!(
                    "action {} is repeated",
                    entry.action_id
                )));
            }
            if !entry.probability.is_finite() || entry.probability < 0.0 {
                return Err(LiveModelError::Exploration(format!(
                    "action {} has invalid probability {}",
                    entry.action_id, entry.probability
                )));
            }
        }
        match self.ranking.first() {
            Some(first) if first.action_id == self.chosen_action_id => Ok(()),
            Some(_) => Err(LiveModelError::Exploration(
                "chosen action does not lead the ranking".to_string(),
            )),
            None => Err(LiveModelError::Exploration("ranking is empty".to_string())),
        }
    }
}

/// Reusable text buffer for serialized events.
///
/// Characters written through [`fmt::Write`] pass through an optional
/// translation so that a serialized event never spans multiple lines.
#[derive(Debug, Default)]
pub struct DataBuffer {
    text: String,
    translate: Option<(char, char)>,
}

impl DataBuffer {
    pub fn new(translate: Option<(char, char)>) -> Self {
        Self {
            text: String::with_capacity(1024),
            translate,
        }
    }

    pub fn reset(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn remove_last(&mut self) {
        self.text.pop();
    }
}

impl fmt::Write for DataBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        match self.translate {
            Some((from, to)) if s.contains(from) => {
                self.text
                    .extend(s.chars().map(|c| if c == from { to } else { c }));
            }
            _ => self.text.push_str(s),
        }
        Ok(())
    }
}

/// Pool factory for [`DataBuffer`]s that flattens newlines to spaces.
#[derive(Debug, Clone, Copy)]
pub struct BufferFactory {
    translate: Option<(char, char)>,
}

impl BufferFactory {
    pub fn new(translate: Option<(char, char)>) -> Self {
        Self { translate }
    }
}

impl Default for BufferFactory {
    fn default() -> Self {
        Self::new(Some(('\n', ' ')))
    }
}

impl PoolFactory<DataBuffer> for BufferFactory {
    fn create(&self) -> DataBuffer {
        DataBuffer::new(self.translate)
    }

    fn reset(&self, buffer: &mut DataBuffer) {
        buffer.reset();
    }
}

fn write_json_string(buf: &mut DataBuffer, value: &str) -> Result<()> {
    let quoted = serde_json::to_string(value)
        .map_err(|e| LiveModelError::InvalidArgument(format!("cannot encode string: {e}")))?;
    buf.write_str(&quoted).map_err(fmt_error)
}

fn fmt_error(_: fmt::Error) -> LiveModelError {
    LiveModelError::logging("failed to format event")
}

/// Serialization of decision events.
pub struct RankingEvent;

impl RankingEvent {
    /// Write `(event_id, context, response)` as one decision event line.
    pub fn serialize(
        buf: &mut DataBuffer,
        event_id: &str,
        context: &str,
        response: &RankingResponse,
    ) -> Result<()> {
        buf.write_str(r#"{"Version":"1","EventId":"#).map_err(fmt_error)?;
        write_json_string(buf, event_id)?;
        buf.write_str(r#","a":["#).map_err(fmt_error)?;
        for entry in response.ranking() {
            write!(buf, "{},", entry.action_id + 1).map_err(fmt_error)?;
        }
        if !response.is_empty() {
            buf.remove_last();
        }
        write!(buf, r#"],"c":{context},"p":["#).map_err(fmt_error)?;
        for entry in response.ranking() {
            write!(buf, "{},", entry.probability).map_err(fmt_error)?;
        }
        if !response.is_empty() {
            buf.remove_last();
        }
        buf.write_str(r#"],"VWState":{"m":"#).map_err(fmt_error)?;
        write_json_string(buf, response.model_id())?;
        buf.write_str("}}").map_err(fmt_error)
    }
}

/// Observed outcome for a previous decision.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// A JSON fragment, written verbatim.
    Text(String),
    /// A numeric reward.
    Value(f32),
}

impl From<&str> for Outcome {
    fn from(value: &str) -> Self {
        Outcome::Text(value.to_string())
    }
}

impl From<String> for Outcome {
    fn from(value: String) -> Self {
        Outcome::Text(value)
    }
}

impl From<f32> for Outcome {
    fn from(value: f32) -> Self {
        Outcome::Value(value)
    }
}

/// Serialization of outcome events.
pub struct OutcomeEvent;

impl OutcomeEvent {
    pub fn serialize(buf: &mut DataBuffer, event_id: &str, outcome: &Outcome) -> Result<()> {
        buf.write_str(r#"{"EventId":"#).map_err(fmt_error)?;
        write_json_string(buf, event_id)?;
        match outcome {
            Outcome::Text(text) => write!(buf, r#","v":{text}}}"#),
            Outcome::Value(value) => write!(buf, r#","v":{value}}}"#),
        }
        .map_err(fmt_error)
    }
}

/// A decision event read back from the log, for joining with outcomes.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DecisionRecord {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "EventId")]
    pub event_id: String,
    /// 1-based action ids in ranking order.
    #[serde(rename = "a")]
    pub actions: Vec<usize>,
    #[serde(rename = "c")]
    pub context: serde_json::Value,
    #[serde(rename = "p")]
    pub probabilities: Vec<f32>,
    #[serde(rename = "VWState")]
    pub state: ModelState,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ModelState {
    #[serde(rename = "m")]
    pub model_id: String,
}

impl DecisionRecord {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| LiveModelError::InvalidArgument(format!("malformed decision event: {e}")))
    }

    /// The chosen action (0-based), which leads the logged ranking.
    pub fn chosen_action_id(&self) -> Option<usize> {
        self.actions.first().map(|a| a.saturating_sub(1))
    }

    /// Rebuild the response that produced this record.
    pub fn to_response(&self) -> RankingResponse {
        let mut response = RankingResponse::new();
        for (action, probability) in self.actions.iter().zip(&self.probabilities) {
            response.push(action.saturating_sub(1), *probability);
        }
        response.set_chosen_action_id(self.chosen_action_id().unwrap_or(0));
        response.set_model_id(self.state.model_id.clone());
        response.set_event_id(self.event_id.clone());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write;

    fn sample_response() -> RankingResponse {
        let mut response = RankingResponse::new();
        response.push(2, 0.1);
        response.push(1, 0.1);
        response.push(0, 0.8);
        response.set_chosen_action_id(2);
        response.set_model_id("model-7");
        response.set_event_id("ev1");
        response
    }

    #[test]
    fn test_from_pdf_swaps_chosen_with_top() {
        let pdf = [0.7, 0.1, 0.1, 0.1];

        let response = RankingResponse::from_pdf(&pdf, 2).unwrap();
        let order: Vec<usize> = response.ranking().iter().map(|e| e.action_id).collect();
        assert_eq!(order, vec![2, 1, 0, 3]);
        assert_eq!(response.chosen_action_id(), 2);
        assert_eq!(response.probability_of(0), Some(0.7));
        assert_eq!(response.probability_of(2), Some(0.1));
        response.validate(4).unwrap();

        let response = RankingResponse::from_pdf(&pdf, 0).unwrap();
        let order: Vec<usize> = response.ranking().iter().map(|e| e.action_id).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);

        assert!(RankingResponse::from_pdf(&pdf, 4).is_err());
    }

    #[test]
    fn test_validate() {
        let response = sample_response();
        response.validate(3).unwrap();
        assert!(response.validate(4).is_err());

        let mut wrong_lead = sample_response();
        wrong_lead.set_chosen_action_id(0);
        assert!(wrong_lead.validate(3).is_err());

        let mut repeated = RankingResponse::new();
        repeated.push(0, 0.5);
        repeated.push(0, 0.5);
        assert!(repeated.validate(2).is_err());
        assert!(repeated.check_well_formed().is_err());
    }

    #[test]
    fn test_check_well_formed() {
        sample_response().check_well_formed().unwrap();
        assert!(RankingResponse::new().check_well_formed().is_err());

        for bad in [f32::NAN, f32::INFINITY, -0.5] {
            let mut response = RankingResponse::new();
            response.push(0, bad);
            response.push(1, 1.0);
            let err = response.check_well_formed().unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Exploration);
        }

        // out of range ids are only caught once the action count is known
        let mut sparse = RankingResponse::new();
        sparse.push(7, 1.0);
        sparse.set_chosen_action_id(7);
        sparse.check_well_formed().unwrap();
        assert!(sparse.validate(1).is_err());
    }

    #[test]
    fn test_serialize_ranking_event() {
        let mut buf = BufferFactory::default().create();
        let context = r#"{"_multi":[{"a":1},{"a":2},{"a":3}]}"#;
        RankingEvent::serialize(&mut buf, "ev1", context, &sample_response()).unwrap();
        assert_eq!(
            buf.as_str(),
            r#"{"Version":"1","EventId":"ev1","a":[3,2,1],"c":{"_multi":[{"a":1},{"a":2},{"a":3}]},"p":[0.1,0.1,0.8],"VWState":{"m":"model-7"}}"#
        );
    }

    #[test]
    fn test_serialized_event_is_single_line_and_parses_back() {
        let mut buf = BufferFactory::default().create();
        let context = "{\"_multi\":\n[{\"a\":1},\n{\"a\":2},{\"a\":3}]}";
        let response = sample_response();
        RankingEvent::serialize(&mut buf, "ev\"1", context, &response).unwrap();
        assert!(!buf.as_str().contains('\n'));

        let record = DecisionRecord::parse(buf.as_str()).unwrap();
        assert_eq!(record.event_id, "ev\"1");
        assert_eq!(record.chosen_action_id(), Some(2));
        assert_eq!(record.context["_multi"].as_array().unwrap().len(), 3);

        let rebuilt = record.to_response();
        assert_eq!(rebuilt.ranking(), response.ranking());
        assert_eq!(rebuilt.model_id(), "model-7");
    }

    #[test]
    fn test_serialize_outcome_event() {
        let mut buf = BufferFactory::default().create();
        OutcomeEvent::serialize(&mut buf, "ev1", &Outcome::Value(1.5)).unwrap();
        assert_eq!(buf.as_str(), r#"{"EventId":"ev1","v":1.5}"#);

        buf.reset();
        OutcomeEvent::serialize(&mut buf, "ev1", &Outcome::from(r#"{"clicked":true}"#)).unwrap();
        assert_eq!(buf.as_str(), r#"{"EventId":"ev1","v":{"clicked":true}}"#);
    }

    #[test]
    fn test_buffer_without_translation() {
        let mut buf = BufferFactory::new(None).create();
        buf.write_str("a\nb").unwrap();
        assert_eq!(buf.as_str(), "a\nb");
    }
}
