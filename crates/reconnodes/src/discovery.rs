//! Subdomain enumeration tools.

use crate::kind::{definition, Builtin};
use crate::parsers::parse_subdomains;
use crate::tool::{build_command, run_tool, ToolProfile};
use async_trait::async_trait;
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeResult,
    PortDefinition,
};
use serde::{Deserialize, Serialize};

fn domain_ports() -> (Vec<PortDefinition>, Vec<PortDefinition>) {
    (
        vec![PortDefinition::new("domain", "string")
            .describe("Target domain (can be provided via connection or config)")],
        vec![PortDefinition::new("subdomains", "array")
            .required()
            .describe("Discovered subdomains")],
    )
}

/// Comma-joined resolver list from a one-per-line text field.
fn resolver_list(text: Option<&str>) -> Option<String> {
    let resolvers: Vec<&str> = text?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    (!resolvers.is_empty()).then(|| resolvers.join(","))
}

node_config! {
    pub struct SubfinderConfig {
        domain: Option<String> = None => ConfigField::string("Target Domain")
            .describe("Domain to enumerate subdomains for (e.g., example.com)"),
        threads: u32 = 10 => ConfigField::number("Threads")
            .describe("Number of concurrent threads")
            .range(1.0, 100.0),
        timeout: u32 = 30 => ConfigField::number("Timeout (seconds)")
            .describe("Timeout for each thread")
            .range(1.0, 300.0),
        sources: Vec<String> = vec!["all".to_string()] => ConfigField::multiselect("Sources")
            .describe("Specific sources to use")
            .option("All Sources", "all")
            .option("Certificate Transparency", "certspotter")
            .option("DNS Dumpster", "dnsdumpster")
            .option("Hackertarget", "hackertarget")
            .option("Shodan", "shodan")
            .option("Virustotal", "virustotal"),
        resolvers: Option<String> = None => ConfigField::text("Custom Resolvers")
            .describe("Custom DNS resolvers (one per line)"),
    }
}

/// Passive enumeration with subfinder.
pub struct SubfinderNode {
    config: SubfinderConfig,
}

impl SubfinderNode {
    fn command_template(&self) -> String {
        let config = &self.config;
        let mut command = format!(
            "subfinder -d {{{{input}}}} -t {} -timeout {} -silent",
            config.threads, config.timeout
        );
        let picked: Vec<&str> = config
            .sources
            .iter()
            .map(String::as_str)
            .filter(|s| *s != "all")
            .collect();
        if !picked.is_empty() && !config.sources.iter().any(|s| s == "all") {
            command.push_str(&format!(" -s {}", picked.join(",")));
        }
        if let Some(resolvers) = resolver_list(config.resolvers.as_deref()) {
            command.push_str(&format!(" -r {}", resolvers));
        }
        command
    }
}

impl Builtin for SubfinderNode {
    const TYPE: &'static str = "subfinder";

    type Config = SubfinderConfig;

    fn with_config(config: SubfinderConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        let (inputs, outputs) = domain_ports();
        definition::<SubfinderConfig>(
            Self::TYPE,
            NodeCategory::Discovery,
            "Subfinder",
            "Fast passive subdomain enumeration tool",
            "search",
            inputs,
            outputs,
        )
    }
}

#[async_trait]
impl Node for SubfinderNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let profile = ToolProfile::DISCOVERY;
        let command = build_command(
            &ctx,
            &profile,
            &self.command_template(),
            self.config.domain.as_deref(),
        )?;
        run_tool(&ctx, &profile, &command, parse_subdomains).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmassMode {
    #[default]
    Passive,
    Active,
}

impl AmassMode {
    fn subcommand(&self) -> &'static str {
        match self {
            Self::Passive => "intel",
            Self::Active => "enum",
        }
    }
}

node_config! {
    pub struct AmassConfig {
        domain: Option<String> = None => ConfigField::string("Target Domain")
            .describe("Domain to enumerate subdomains for"),
        mode: AmassMode = AmassMode::Passive => ConfigField::select("Enumeration Mode")
            .describe("Active or passive enumeration")
            .option("Passive (Intel)", "passive")
            .option("Active (Enum)", "active"),
        timeout: u32 = 60 => ConfigField::number("Timeout (minutes)")
            .describe("Maximum execution time")
            .range(1.0, 1440.0),
        sources: Vec<String> = Vec::new() => ConfigField::multiselect("Data Sources")
            .describe("Specific data sources to use")
            .option("All Sources", "all")
            .option("Certificate Transparency", "cert")
            .option("DNS Records", "dns")
            .option("Scraping", "scrape")
            .option("Archives", "archive")
            .option("API Keys Required", "api"),
        resolvers: Option<String> = None => ConfigField::text("Custom Resolvers")
            .describe("Custom DNS resolvers (one per line)"),
    }
}

/// Attack surface mapping with amass, passive (`intel`) or active (`enum`).
pub struct AmassNode {
    config: AmassConfig,
}

impl AmassNode {
    fn command_template(&self) -> String {
        let mut command = format!(
            "amass {} -d {{{{input}}}} -timeout {}",
            self.config.mode.subcommand(),
            self.config.timeout
        );
        if let Some(resolvers) = resolver_list(self.config.resolvers.as_deref()) {
            command.push_str(&format!(" -r {}", resolvers));
        }
        command
    }
}

impl Builtin for AmassNode {
    const TYPE: &'static str = "amass";

    type Config = AmassConfig;

    fn with_config(config: AmassConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        let (inputs, outputs) = domain_ports();
        definition::<AmassConfig>(
            Self::TYPE,
            NodeCategory::Discovery,
            "Amass",
            "In-depth attack surface mapping and asset discovery",
            "globe",
            inputs,
            outputs,
        )
    }
}

#[async_trait]
impl Node for AmassNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let profile = ToolProfile::DISCOVERY;
        let command = build_command(
            &ctx,
            &profile,
            &self.command_template(),
            self.config.domain.as_deref(),
        )?;
        run_tool(&ctx, &profile, &command, parse_subdomains).await
    }
}
