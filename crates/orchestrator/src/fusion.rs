//! Prompt fusion: retrieval documents + knowledge-graph facts + history in,
//! one outbound prompt with citation bookkeeping out.
//!
//! # Layout
//!
//! When evidence is present the synthesized turn reads:
//!
//! ```text
//! <instruction>
//!
//! Retrieved documents:
//! [1] source (0.50)
//! content
//!
//! Knowledge graph facts:
//! • node — description
//! • from relationship to
//!
//! <citation / KG notes>
//!
//! Question: <query>
//! ```
//!
//! Without evidence the query passes through untouched.
//!
//! # Determinism
//!
//! Fusion is pure: no clock, no randomness, no I/O. Identical inputs always
//! produce byte-identical output.

use chatfuse_core::evidence::{KgData, RagDocument};
use chatfuse_core::message::{Message, Reference};
use chatfuse_core::provider::LlmRequest;

// ── Constants ─────────────────────────────────────────────────────────────

pub const RAG_HEADER: &str = "Retrieved documents:";
pub const KG_HEADER: &str = "Knowledge graph facts:";

const CONTEXT_INSTRUCTION: &str = "Answer the question primarily using the context below. \
If the context is insufficient, state explicitly what information is missing.";

const KG_NOTE: &str =
    "Flag any statement that relies on the knowledge graph facts with \"(from knowledge graph)\".";

/// Citation hints named in the instruction.
const MAX_HINTS_IN_INSTRUCTION: usize = 3;

const PREVIEW_CHARS: usize = 200;

// ── Types ─────────────────────────────────────────────────────────────────

/// Everything fusion looks at.
#[derive(Debug, Clone, Copy)]
pub struct FusionInput<'a> {
    pub query: &'a str,
    /// Prior turns, oldest first. Invalid turns are dropped.
    pub prior_turns: &'a [Message],
    pub rag_documents: &'a [RagDocument],
    pub kg_data: Option<&'a KgData>,
    pub system_prompt: Option<&'a str>,
}

impl<'a> FusionInput<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            prior_turns: &[],
            rag_documents: &[],
            kg_data: None,
            system_prompt: None,
        }
    }
}

/// The fused prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedPrompt {
    /// Valid prior turns, in order.
    pub turns: Vec<Message>,
    /// Text of the synthesized final turn.
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// RAG and/or KG blocks, if any evidence survived.
    pub context_block: Option<String>,
    /// `"[i] source"` for every surviving document.
    pub citation_hints: Vec<String>,
    pub references: Vec<Reference>,
    pub used_rag: bool,
    pub used_kg: bool,
}

impl FusedPrompt {
    /// Turn the fused prompt into a provider request. The synthesized turn is
    /// appended after the prior turns.
    pub fn into_request(self, model: impl Into<String>, temperature: f32, max_tokens: u32) -> LlmRequest {
        let mut turns = self.turns;
        turns.push(Message::user(self.prompt));
        LlmRequest {
            model: model.into(),
            system_prompt: self.system_prompt,
            turns,
            temperature,
            max_tokens,
        }
    }
}

// ── Fusion ────────────────────────────────────────────────────────────────

/// Fuse evidence and history into one prompt.
pub fn fuse(input: FusionInput<'_>) -> FusedPrompt {
    let turns: Vec<Message> = input.prior_turns.iter().filter(|m| m.is_valid()).cloned().collect();

    let documents: Vec<(&str, &str, Option<f64>)> = input
        .rag_documents
        .iter()
        .filter_map(|doc| {
            let source = doc.source.as_deref().filter(|s| !s.trim().is_empty())?;
            let content = doc.content.as_deref().filter(|c| !c.trim().is_empty())?;
            Some((source, content, doc.score.map(display_score)))
        })
        .collect();

    let citation_hints: Vec<String> = documents
        .iter()
        .enumerate()
        .map(|(i, (source, _, _))| format!("[{}] {}", i + 1, source))
        .collect();

    let references: Vec<Reference> = documents
        .iter()
        .map(|(source, content, score)| Reference {
            source: source.to_string(),
            relevance_score: *score,
            content_preview: preview(content),
        })
        .collect();

    let rag_block = (!documents.is_empty()).then(|| rag_block(&documents));
    let kg_block = input.kg_data.filter(|kg| !kg.is_empty()).map(kg_block);

    let used_rag = rag_block.is_some();
    let used_kg = kg_block.is_some();

    let context_block = match (rag_block, kg_block) {
        (Some(rag), Some(kg)) => Some(format!("{rag}\n\n{kg}")),
        (Some(block), None) | (None, Some(block)) => Some(block),
        (None, None) => None,
    };

    let prompt = match &context_block {
        None => input.query.to_string(),
        Some(block) => {
            let mut notes = Vec::new();
            if used_rag {
                let named: Vec<&str> = citation_hints
                    .iter()
                    .take(MAX_HINTS_IN_INSTRUCTION)
                    .map(String::as_str)
                    .collect();
                notes.push(format!(
                    "Cite the retrieved documents you rely on by their label, for example {}.",
                    named.join(", ")
                ));
            }
            if used_kg {
                notes.push(KG_NOTE.to_string());
            }
            format!(
                "{CONTEXT_INSTRUCTION}\n\n{block}\n\n{}\n\nQuestion: {}",
                notes.join("\n"),
                input.query
            )
        }
    };

    FusedPrompt {
        turns,
        prompt,
        system_prompt: input.system_prompt.map(String::from),
        context_block,
        citation_hints,
        references,
        used_rag,
        used_kg,
    }
}

/// `1 / (1 + distance)`. Negative distances are clamped to zero.
pub fn display_score(raw: f64) -> f64 {
    1.0 / (1.0 + raw.max(0.0))
}

fn rag_block(documents: &[(&str, &str, Option<f64>)]) -> String {
    let entries: Vec<String> = documents
        .iter()
        .enumerate()
        .map(|(i, (source, content, score))| match score {
            Some(score) => format!("[{}] {} ({:.2})\n{}", i + 1, source, score, content.trim()),
            None => format!("[{}] {}\n{}", i + 1, source, content.trim()),
        })
        .collect();
    format!("{RAG_HEADER}\n{}", entries.join("\n\n"))
}

fn kg_block(kg: &KgData) -> String {
    let mut lines = vec![KG_HEADER.to_string()];
    for node in &kg.nodes {
        match node.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(description) => lines.push(format!("• {} — {}", node.id, description)),
            None => lines.push(format!("• {}", node.id)),
        }
    }
    for edge in &kg.edges {
        lines.push(format!("• {} {} {}", edge.from, edge.relationship, edge.to));
    }
    lines.join("\n")
}

fn preview(content: &str) -> String {
    let content = content.trim();
    if content.chars().count() > PREVIEW_CHARS {
        let cut: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        content.to_string()
    }
}
