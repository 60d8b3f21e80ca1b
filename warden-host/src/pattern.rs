//! Declarative rule-pack plugin: each rule is a regular expression matched
//! line by line, with an optional replacement fix.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use warden_package::{FixTemplate, PluginManifest};
use warden_types::{
    Capabilities, CapabilityError, Confidence, DiagnosticCapability, Fix, Issue, PluginMetadata,
    Position, Rule, TextEdit,
};

use crate::error::HostError;
use crate::lock;

struct CompiledRule {
    rule: Rule,
    regex: Regex,
    message: String,
    confidence: Confidence,
    fix: Option<FixTemplate>,
}

#[derive(Default)]
struct RuleSelection {
    enabled: HashSet<String>,
    disabled: HashSet<String>,
}

pub struct PatternPlugin {
    metadata: PluginMetadata,
    capabilities: Capabilities,
    rules: Vec<CompiledRule>,
    selection: Mutex<RuleSelection>,
}

impl PatternPlugin {
    /// Compiles every rule of `manifest`. Fails on the first invalid pattern.
    pub fn from_manifest(manifest: &PluginManifest, module_api_version: u32) -> Result<Self, HostError> {
        let metadata = manifest.metadata(module_api_version);
        let rules = manifest
            .rules
            .iter()
            .map(|r| {
                let regex = Regex::new(&r.pattern).map_err(|e| {
                    HostError::LoadFailed(format!(
                        "plugin '{}' rule '{}': invalid pattern: {e}",
                        manifest.id, r.id
                    ))
                })?;
                Ok(CompiledRule {
                    rule: r.to_rule(),
                    regex,
                    message: r.message.clone().unwrap_or_else(|| r.title.clone()),
                    confidence: r.confidence,
                    fix: r.fix.clone(),
                })
            })
            .collect::<Result<Vec<_>, HostError>>()?;

        let capabilities = Capabilities {
            supported_languages: metadata.supported_extensions.clone(),
            max_file_size: manifest.max_file_size,
            can_fix: rules.iter().any(|r| r.fix.is_some()),
            supports_batch: true,
        };

        Ok(Self {
            metadata,
            capabilities,
            rules,
            selection: Mutex::new(RuleSelection::default()),
        })
    }

    fn is_active(&self, rule: &Rule) -> bool {
        let selection = lock(&self.selection);
        if selection.disabled.contains(&rule.id) {
            return false;
        }
        rule.enabled_by_default || selection.enabled.contains(&rule.id)
    }

    fn find_rule(&self, rule_id: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.rule.id == rule_id)
    }
}

/// Byte offset of the 1-based character column `column` in `line`.
fn byte_offset(line: &str, column: u32) -> Option<usize> {
    let index = column.checked_sub(1)? as usize;
    if index == line.chars().count() {
        return Some(line.len());
    }
    line.char_indices().nth(index).map(|(i, _)| i)
}

fn string_list(config: &serde_json::Value, key: &str) -> Result<HashSet<String>, CapabilityError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(HashSet::new()),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CapabilityError::Configuration(format!("'{key}' must list rule ids")))
            })
            .collect(),
        Some(_) => Err(CapabilityError::Configuration(format!(
            "'{key}' must be an array"
        ))),
    }
}

#[async_trait]
impl DiagnosticCapability for PatternPlugin {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    async fn analyze(&self, path: &Path, content: &str) -> Result<Vec<Issue>, CapabilityError> {
        let mut issues = Vec::new();
        for compiled in self.rules.iter().filter(|r| self.is_active(&r.rule)) {
            for (index, line) in content.lines().enumerate() {
                let line_no = index as u32 + 1;
                for m in compiled.regex.find_iter(line) {
                    if m.is_empty() {
                        continue;
                    }
                    let start = line[..m.start()].chars().count() as u32 + 1;
                    let end = line[..m.end()].chars().count() as u32 + 1;
                    issues.push(
                        Issue::new(&self.metadata.id, &compiled.rule, path, &compiled.message)
                            .at(line_no, start, line_no, end)
                            .with_confidence(compiled.confidence)
                            .with_property("matched_text", m.as_str().into()),
                    );
                }
            }
        }
        issues.sort_by_key(|i| (i.start_line, i.start_column));
        Ok(issues)
    }

    fn rules(&self) -> Vec<Rule> {
        self.rules.iter().map(|r| r.rule.clone()).collect()
    }

    async fn get_fixes(&self, issue: &Issue, content: &str) -> Result<Vec<Fix>, CapabilityError> {
        let Some(compiled) = self.find_rule(&issue.rule_id) else {
            return Ok(Vec::new());
        };
        let Some(template) = &compiled.fix else {
            return Ok(Vec::new());
        };

        let line = content
            .lines()
            .nth(issue.start_line.saturating_sub(1) as usize)
            .ok_or_else(|| CapabilityError::Fix(format!("line {} not found", issue.start_line)))?;
        let start = byte_offset(line, issue.start_column)
            .ok_or_else(|| CapabilityError::Fix(format!("column {} out of range", issue.start_column)))?;

        let caps = compiled
            .regex
            .captures_at(line, start)
            .filter(|c| c.get(0).is_some_and(|m| m.start() == start))
            .ok_or_else(|| CapabilityError::Fix("content no longer matches the rule".into()))?;

        let mut replacement = String::new();
        caps.expand(&template.replacement, &mut replacement);

        let edit = TextEdit::new(
            issue.file_path.clone(),
            Position::new(issue.start_line - 1, issue.start_column - 1),
            Position::new(issue.end_line - 1, issue.end_column - 1),
            replacement,
        );
        let fix = Fix::new(issue.id, &issue.rule_id, &self.metadata.id, &template.title, vec![edit])
            .with_confidence(template.confidence);
        Ok(vec![fix])
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    /// Accepts `{"enabled_rules": [...], "disabled_rules": [...]}`.
    fn configure(&self, config: &serde_json::Value) -> Result<(), CapabilityError> {
        if !config.is_object() && !config.is_null() {
            return Err(CapabilityError::Configuration("expected an object".into()));
        }
        let enabled = string_list(config, "enabled_rules")?;
        let disabled = string_list(config, "disabled_rules")?;
        if let Some(unknown) = enabled
            .iter()
            .chain(disabled.iter())
            .find(|id| self.find_rule(id).is_none())
        {
            return Err(CapabilityError::Configuration(format!("unknown rule '{unknown}'")));
        }
        *lock(&self.selection) = RuleSelection { enabled, disabled };
        Ok(())
    }
}
