//! Prompt Builder System
//!
//! Section-based prompt construction shared by every AI step, plus the
//! templates for the summary batch, analysis batch and overview prompts.
//! Batch templates embed each file's content bounded by a per-file token
//! budget and spell out the exact JSON array the validator expects.

use std::path::Path;

use crate::constants;
use crate::types::{FileNode, truncate_to_token_limit};

/// Prompt section types
#[derive(Debug, Clone)]
pub enum PromptSection {
    /// Role definition with expertise area
    Role { expertise: String, task: String },
    /// Numbered objectives
    Objectives(Vec<String>),
    /// Raw text section with optional header
    Text {
        header: Option<String>,
        content: String,
    },
    /// Code block with language
    Code { language: String, content: String },
    /// Hard output rules
    Rules(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, expertise: &str, task: &str) -> Self {
        self.sections.push(PromptSection::Role {
            expertise: expertise.to_string(),
            task: task.to_string(),
        });
        self
    }

    pub fn objectives(mut self, objectives: &[&str]) -> Self {
        self.sections.push(PromptSection::Objectives(
            objectives.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    pub fn text(mut self, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: None,
            content: content.to_string(),
        });
        self
    }

    /// Add text section with header
    pub fn section(mut self, header: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: Some(header.to_string()),
            content: content.to_string(),
        });
        self
    }

    pub fn code(mut self, language: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Code {
            language: language.to_string(),
            content: content.to_string(),
        });
        self
    }

    pub fn rules<S: AsRef<str>>(mut self, rules: &[S]) -> Self {
        self.sections.push(PromptSection::Rules(
            rules.iter().map(|s| s.as_ref().to_string()).collect(),
        ));
        self
    }

    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Role { expertise, task } => {
                    prompt.push_str("<ROLE>\n");
                    prompt.push_str(&format!(
                        "You are an expert {} specializing in {}.\n",
                        expertise, task
                    ));
                    prompt.push_str("</ROLE>\n\n");
                }
                PromptSection::Objectives(objectives) => {
                    prompt.push_str("<OBJECTIVES>\n");
                    for (i, obj) in objectives.iter().enumerate() {
                        prompt.push_str(&format!("{}. {}\n", i + 1, obj));
                    }
                    prompt.push_str("</OBJECTIVES>\n\n");
                }
                PromptSection::Text { header, content } => {
                    if let Some(h) = header {
                        prompt.push_str(&format!("# {}\n\n", h));
                    }
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                PromptSection::Code { language, content } => {
                    prompt.push_str(&format!("```{}\n", language));
                    prompt.push_str(&content);
                    prompt.push_str("\n```\n\n");
                }
                PromptSection::Rules(rules) => {
                    prompt.push_str("<OUTPUT_RULES>\n");
                    for rule in rules {
                        prompt.push_str(&format!("- {}\n", rule));
                    }
                    prompt.push_str("</OUTPUT_RULES>\n\n");
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

// =============================================================================
// Templates
// =============================================================================

pub struct PromptTemplates;

impl PromptTemplates {
    /// One short summary per file, answered as `[{"path", "summary"}]`
    pub fn summary_batch(files: &[FileNode]) -> String {
        let builder = PromptBuilder::new()
            .role("software engineer", "reading unfamiliar codebases")
            .objectives(&[
                "Summarize what each file below is responsible for",
                "Keep each summary to one or two sentences",
                "Mention the main types or functions a reader would look for",
            ])
            .rules(&batch_rules("summary"));

        with_files(builder, files, |_| None).build()
    }

    /// Deep analysis per file, informed by the project overview
    pub fn analysis_batch(files: &[FileNode], overview: Option<&str>) -> String {
        let mut builder = PromptBuilder::new()
            .role("software architect", "explaining code in its project context")
            .objectives(&[
                "Explain how each file works and how it fits the project",
                "Point out notable control flow, data structures and dependencies",
                "Flag risks a maintainer should know before changing the file",
            ]);

        if let Some(overview) = overview {
            builder = builder.section("Project Overview", overview);
        }
        builder = builder.rules(&batch_rules("analysis"));

        with_files(builder, files, |file| file.short_summary.as_deref()).build()
    }

    /// Free-text overview of the whole project from its file summaries
    pub fn overview(source_locator: &str, summaries: &[(String, String)]) -> String {
        let listing = summaries
            .iter()
            .map(|(path, summary)| format!("- {}: {}", path, summary))
            .collect::<Vec<_>>()
            .join("\n");
        let listing =
            truncate_to_token_limit(&listing, constants::batch::MAX_OVERVIEW_INPUT_TOKENS);

        PromptBuilder::new()
            .role("software architect", "onboarding engineers onto new projects")
            .objectives(&[
                "Describe the purpose of the project",
                "Outline its main components and how they interact",
                "Name the entry points a newcomer should read first",
            ])
            .section("Repository", source_locator)
            .section("File Summaries", &listing)
            .text("Answer in plain Markdown. Do not wrap the answer in JSON.")
            .build()
    }
}

fn batch_rules(field: &str) -> [String; 3] {
    [
        format!(
            r#"Respond with a JSON array only: [{{"path": "<file path>", "{}": "<text>"}}]"#,
            field
        ),
        "Include exactly one object per file listed below, using the path exactly as given"
            .to_string(),
        format!(r#"Each object has exactly the keys "path" and "{}""#, field),
    ]
}

fn with_files<'a>(
    mut builder: PromptBuilder,
    files: &'a [FileNode],
    note: impl Fn(&'a FileNode) -> Option<&'a str>,
) -> PromptBuilder {
    for file in files {
        let mut header = format!("File: {}", file.path);
        if let Some(note) = note(file) {
            header.push_str(&format!("\nSummary: {}", note));
        }
        let content =
            truncate_to_token_limit(&file.content, constants::batch::MAX_FILE_PROMPT_TOKENS);
        builder = builder.text(&header).code(language_hint(&file.path), &content);
    }
    builder
}

/// Fence label for a file path
fn language_hint(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match ext {
        "rs" => "rust",
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" => "javascript",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "sh" => "bash",
        "md" => "markdown",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str, summary: Option<&str>) -> FileNode {
        FileNode {
            id: path.to_string(),
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            content: content.to_string(),
            content_hash: String::new(),
            directory_id: None,
            run_id: "run".to_string(),
            short_summary: summary.map(str::to_string),
            analysis: None,
        }
    }

    #[test]
    fn test_builder_sections() {
        let prompt = PromptBuilder::new()
            .role("code analyst", "Rust")
            .objectives(&["Analyze code", "Summarize"])
            .rules(&["JSON only"])
            .build();

        assert!(prompt.contains("<ROLE>"));
        assert!(prompt.contains("1. Analyze code"));
        assert!(prompt.contains("2. Summarize"));
        assert!(prompt.contains("- JSON only"));
    }

    #[test]
    fn test_summary_batch_lists_every_file() {
        let files = vec![
            file("src/main.rs", "fn main() {}", None),
            file("README.md", "# Demo", None),
        ];
        let prompt = PromptTemplates::summary_batch(&files);

        assert!(prompt.contains("File: src/main.rs"));
        assert!(prompt.contains("```rust\nfn main() {}\n```"));
        assert!(prompt.contains("File: README.md"));
        assert!(prompt.contains(r#""summary""#));
    }

    #[test]
    fn test_analysis_batch_includes_overview_and_summary() {
        let files = vec![file("lib.rs", "pub fn x() {}", Some("Exports x"))];
        let prompt = PromptTemplates::analysis_batch(&files, Some("A tiny demo crate"));

        assert!(prompt.contains("# Project Overview"));
        assert!(prompt.contains("A tiny demo crate"));
        assert!(prompt.contains("Summary: Exports x"));
        assert!(prompt.contains(r#""analysis""#));
    }

    #[test]
    fn test_long_content_is_truncated() {
        let big = "x".repeat(constants::batch::MAX_FILE_PROMPT_TOKENS * 10);
        let prompt = PromptTemplates::summary_batch(&[file("big.txt", &big, None)]);
        assert!(prompt.contains("[truncated]"));
        assert!(prompt.len() < big.len());
    }

    #[test]
    fn test_overview_prompt() {
        let summaries = vec![("src/lib.rs".to_string(), "Library root".to_string())];
        let prompt = PromptTemplates::overview("octo/demo", &summaries);
        assert!(prompt.contains("octo/demo"));
        assert!(prompt.contains("- src/lib.rs: Library root"));
    }
}
