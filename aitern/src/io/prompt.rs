//! Prompt rendering for the generation collaborator.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::path::to_slash;
use crate::core::summary::Language;
use crate::io::generator::GenerationRequest;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");

/// Cap on each embedded file so one huge module cannot crowd out the rest.
const MAX_EMBEDDED_CHARS: usize = 12_000;

#[derive(Debug, Serialize)]
struct FileContext {
    path: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct PreviousAttempt<'a> {
    code: &'a str,
    reason: &'a str,
}

fn language_names(language: Language) -> (&'static str, &'static str) {
    match language {
        Language::Python => ("Python", "python"),
        Language::JavaScript => ("JavaScript", "javascript"),
        Language::TypeScript => ("TypeScript", "typescript"),
        Language::Other => ("software", ""),
    }
}

fn clip(text: &str) -> String {
    let mut clipped: String = text.chars().take(MAX_EMBEDDED_CHARS).collect();
    if clipped.len() < text.len() {
        clipped.push_str("\n# ... truncated ...\n");
    }
    clipped
}

/// Render the generation prompt for `request`.
pub fn render_generation_prompt(request: &GenerationRequest) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("generate", GENERATE_TEMPLATE)
        .context("load generation template")?;
    let template = env.get_template("generate")?;

    let (language, fence) = language_names(request.language);
    let related_files: Vec<FileContext> = request
        .related_files
        .iter()
        .map(|file| FileContext {
            path: to_slash(&file.path),
            content: clip(&file.content),
        })
        .collect();
    let previous_attempt = request.previous_attempt.as_ref().map(|prev| PreviousAttempt {
        code: prev.code.as_str(),
        reason: prev.reason.as_str(),
    });

    let rendered = template
        .render(context! {
            language => language,
            fence => fence,
            target_path => to_slash(&request.target_path),
            test_name => request.test_name.as_str(),
            failure => Some(request.failure.trim()).filter(|s| !s.is_empty()),
            test_source => clip(request.test_source.trim_end()),
            current_target => request
                .current_target
                .as_deref()
                .map(str::trim_end)
                .filter(|s| !s.is_empty())
                .map(clip),
            imports => request.imports.clone(),
            related_files => related_files,
            previous_attempt => previous_attempt,
            attempt => request.attempt,
        })
        .context("render generation prompt")?;
    Ok(rendered)
}
