//! Check command - Validate a selection-rule file and optionally evaluate
//! it against a method signature.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;

use calltrace_select::{MethodSignature, SelectionSet, grammar};

use crate::OutputFormat;

/// Arguments for the check command.
#[derive(Args)]
pub struct CheckArgs {
    /// Path to the rule file, one `[!]Class.method(params)` rule per line
    #[arg(required = true)]
    pub rules: PathBuf,

    /// Evaluate the rules against this full method signature,
    /// e.g. "demo.Calc.add(i32,i64)i64"
    #[arg(short, long)]
    pub signature: Option<String>,
}

/// Parse a `Class.method(params)ret` signature string.
fn parse_signature(text: &str) -> Result<MethodSignature> {
    let open = text
        .find('(')
        .with_context(|| format!("Signature {text:?} has no parameter list"))?;
    let (name, descriptor) = text.split_at(open);
    let dot = name
        .rfind('.')
        .with_context(|| format!("Signature {text:?} has no class-qualified method name"))?;
    let (class, method) = name.split_at(dot);
    Ok(MethodSignature::parse_descriptor(
        class,
        &method[1..],
        descriptor,
    )?)
}

/// Decision for an evaluated signature.
#[derive(Debug, Serialize)]
struct Decision {
    signature: String,
    selected: bool,
    capture_arguments: bool,
    matching_includes: Vec<String>,
    matching_excludes: Vec<String>,
}

/// Check result.
#[derive(Debug, Serialize)]
struct CheckResult {
    valid: bool,
    path: String,
    including: Vec<String>,
    excluding: Vec<String>,
    errors: Vec<String>,
    decision: Option<Decision>,
}

/// Execute the check command.
pub fn execute(args: CheckArgs, format: OutputFormat) -> Result<()> {
    let text = fs::read_to_string(&args.rules)
        .with_context(|| format!("Failed to read rule file {}", args.rules.display()))?;

    let mut result = CheckResult {
        valid: true,
        path: args.rules.display().to_string(),
        including: Vec::new(),
        excluding: Vec::new(),
        errors: Vec::new(),
        decision: None,
    };

    let set = match grammar::parse_rules(&text) {
        Ok(rules) => {
            let set = SelectionSet::from_rules(rules);
            result.including = set
                .including_rules()
                .map(|rule| rule.canonical())
                .collect();
            result.excluding = set
                .excluding_rules()
                .map(|rule| rule.canonical())
                .collect();
            Some(set)
        }
        Err(e) => {
            result.valid = false;
            result.errors.push(e.to_string());
            None
        }
    };

    if let (Some(set), Some(text)) = (&set, &args.signature) {
        let signature = parse_signature(text)?;
        let decision = set.decide(&signature);
        result.decision = Some(Decision {
            signature: signature.to_string(),
            selected: decision.is_some(),
            capture_arguments: decision.is_some_and(|d| d.capture_arguments),
            matching_includes: set
                .matching_include_rules(&signature)
                .iter()
                .map(|rule| rule.canonical())
                .collect(),
            matching_excludes: set
                .matching_exclude_rules(&signature)
                .iter()
                .map(|rule| rule.canonical())
                .collect(),
        });
    }

    match format {
        OutputFormat::Human => {
            if result.valid {
                println!("Rule file is valid: {}", result.path);
                println!("  Including rules: {}", result.including.len());
                for rule in &result.including {
                    println!("    {}", rule);
                }
                println!("  Excluding rules: {}", result.excluding.len());
                for rule in &result.excluding {
                    println!("    !{}", rule);
                }
            } else {
                println!("Rule file is INVALID: {}", result.path);
                for error in &result.errors {
                    println!("  Error: {}", error);
                }
            }

            if let Some(decision) = &result.decision {
                println!("\nSignature: {}", decision.signature);
                if decision.selected {
                    println!(
                        "  Selected (capture arguments: {})",
                        decision.capture_arguments
                    );
                } else {
                    println!("  Not selected");
                }
                for rule in &decision.matching_includes {
                    println!("  Matching include: {}", rule);
                }
                for rule in &decision.matching_excludes {
                    println!("  Matching exclude: !{}", rule);
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::JsonCompact => {
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    if result.valid {
        Ok(())
    } else {
        bail!("Rule file validation failed")
    }
}
