//! Vulnerability scanning, fuzzing and parameter discovery tools.

use crate::kind::{definition, Builtin};
use crate::parsers::{parse_ffuf, parse_nuclei, parse_parameters};
use crate::tool::{build_command, run_tool, ToolProfile};
use async_trait::async_trait;
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeResult,
    PortDefinition,
};

const SEVERITIES: [&str; 5] = ["info", "low", "medium", "high", "critical"];

/// Where ffuf is told to write its JSON report.
pub const FFUF_OUTPUT: &str = "/tmp/ffuf_output.json";

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn target_input(description: &str) -> Vec<PortDefinition> {
    vec![PortDefinition::new("targets", "array").describe(description)]
}

node_config! {
    pub struct NucleiConfig {
        target: Option<String> = None => ConfigField::string("Target URL")
            .describe("URL to scan when no upstream node provides one"),
        severity: Vec<String> = SEVERITIES.iter().map(|s| s.to_string()).collect()
            => ConfigField::multiselect("Severity Levels")
                .describe("Severity levels to include")
                .choices(&SEVERITIES),
        templates: Option<String> = None => ConfigField::string("Templates")
            .describe("Template or template directory to run"),
        tags: Option<String> = None => ConfigField::string("Include Tags")
            .describe("Comma-separated template tags to include"),
        exclude_tags: Option<String> = None => ConfigField::string("Exclude Tags")
            .describe("Comma-separated template tags to exclude"),
        rate_limit: u32 = 150 => ConfigField::number("Rate Limit")
            .describe("Maximum requests per second")
            .range(1.0, 1000.0),
        timeout: u32 = 5 => ConfigField::number("Timeout (seconds)")
            .describe("Per-request timeout")
            .range(1.0, 60.0),
        headers: Option<String> = None => ConfigField::text("Custom Headers")
            .describe("Extra request headers (one per line)"),
        proxy: Option<String> = None => ConfigField::string("Proxy")
            .describe("HTTP or SOCKS proxy URL"),
    }
}

/// Template-driven vulnerability scanning with nuclei.
pub struct NucleiNode {
    config: NucleiConfig,
}

impl NucleiNode {
    fn command_template(&self) -> String {
        let config = &self.config;
        let severity = if config.severity.is_empty() {
            SEVERITIES.join(",")
        } else {
            config.severity.join(",")
        };
        let mut command = format!("nuclei -u \"{{{{input}}}}\" -severity {} -json", severity);

        if let Some(templates) = non_empty(&config.templates) {
            command.push_str(&format!(" -t {}", templates));
        }
        if let Some(tags) = non_empty(&config.tags) {
            command.push_str(&format!(" -tags {}", tags));
        }
        if let Some(tags) = non_empty(&config.exclude_tags) {
            command.push_str(&format!(" -exclude-tags {}", tags));
        }
        command.push_str(&format!(
            " -rate-limit {} -timeout {}",
            config.rate_limit, config.timeout
        ));
        if let Some(headers) = non_empty(&config.headers) {
            for line in headers.lines().map(str::trim).filter(|l| !l.is_empty()) {
                command.push_str(&format!(" -H \"{}\"", line));
            }
        }
        if let Some(proxy) = non_empty(&config.proxy) {
            command.push_str(&format!(" -proxy {}", proxy));
        }
        command
    }
}

impl Builtin for NucleiNode {
    const TYPE: &'static str = "nuclei";

    type Config = NucleiConfig;

    fn with_config(config: NucleiConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<NucleiConfig>(
            Self::TYPE,
            NodeCategory::Analysis,
            "Nuclei",
            "Fast vulnerability scanner based on community templates",
            "shield",
            target_input("Hosts or URLs to scan"),
            vec![PortDefinition::new("findings", "array")
                .required()
                .describe("Vulnerability findings with severity")],
        )
    }
}

#[async_trait]
impl Node for NucleiNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let profile = ToolProfile::ANALYSIS;
        let command = build_command(
            &ctx,
            &profile,
            &self.command_template(),
            self.config.target.as_deref(),
        )?;
        run_tool(&ctx, &profile, &command, parse_nuclei).await
    }
}

node_config! {
    pub struct FfufConfig {
        url: Option<String> = None => ConfigField::string("Target URL")
            .describe("URL with FUZZ keyword (e.g., https://example.com/FUZZ)"),
        wordlist: String = "/usr/share/wordlists/dirb/common.txt".to_string()
            => ConfigField::string("Wordlist")
                .describe("Path to the wordlist on the task host"),
        threads: u32 = 40 => ConfigField::number("Threads")
            .describe("Number of concurrent threads")
            .range(1.0, 200.0),
        delay: Option<f64> = None => ConfigField::number("Delay (seconds)")
            .describe("Delay between requests")
            .range(0.0, 60.0),
        extensions: Option<String> = None => ConfigField::string("Extensions")
            .describe("Comma-separated extensions to append (e.g., .php,.bak)"),
        filter_codes: String = "404".to_string() => ConfigField::string("Filter Status Codes")
            .describe("Comma-separated status codes to hide"),
        match_codes: Option<String> = None => ConfigField::string("Match Status Codes")
            .describe("Comma-separated status codes to show"),
        filter_size: Option<String> = None => ConfigField::string("Filter Response Size")
            .describe("Response sizes to hide"),
        headers: Option<String> = None => ConfigField::text("Custom Headers")
            .describe("Extra request headers (one per line)"),
        proxy: Option<String> = None => ConfigField::string("Proxy")
            .describe("HTTP proxy URL"),
    }
}

/// Content discovery with ffuf. The JSON report is read back from the task
/// output.
pub struct FfufNode {
    config: FfufConfig,
}

impl FfufNode {
    fn command_template(&self) -> String {
        let config = &self.config;
        let mut command = format!(
            "ffuf -u \"{{{{input}}}}\" -w {} -t {}",
            config.wordlist, config.threads
        );
        if let Some(delay) = config.delay.filter(|d| *d > 0.0) {
            command.push_str(&format!(" -p {}", delay));
        }
        if let Some(extensions) = non_empty(&config.extensions) {
            command.push_str(&format!(" -e {}", extensions));
        }
        if !config.filter_codes.trim().is_empty() {
            command.push_str(&format!(" -fc {}", config.filter_codes.trim()));
        }
        if let Some(codes) = non_empty(&config.match_codes) {
            command.push_str(&format!(" -mc {}", codes));
        }
        if let Some(size) = non_empty(&config.filter_size) {
            command.push_str(&format!(" -fs {}", size));
        }
        if let Some(headers) = non_empty(&config.headers) {
            for line in headers.lines().map(str::trim).filter(|l| !l.is_empty()) {
                command.push_str(&format!(" -H \"{}\"", line));
            }
        }
        if let Some(proxy) = non_empty(&config.proxy) {
            command.push_str(&format!(" -x {}", proxy));
        }
        command.push_str(&format!(" -o {} -of json", FFUF_OUTPUT));
        command
    }
}

impl Builtin for FfufNode {
    const TYPE: &'static str = "ffuf";

    type Config = FfufConfig;

    fn with_config(config: FfufConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<FfufConfig>(
            Self::TYPE,
            NodeCategory::Analysis,
            "FFUF",
            "Fast web fuzzer for directory and parameter discovery",
            "zap",
            target_input("URLs to fuzz"),
            vec![PortDefinition::new("results", "array")
                .required()
                .describe("Discovered paths with status codes")],
        )
    }
}

#[async_trait]
impl Node for FfufNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let profile = ToolProfile::ANALYSIS;
        let command = build_command(
            &ctx,
            &profile,
            &self.command_template(),
            self.config.url.as_deref(),
        )?;
        run_tool(&ctx, &profile, &command, parse_ffuf).await
    }
}

node_config! {
    pub struct ArjunConfig {
        url: Option<String> = None => ConfigField::string("Target URL")
            .describe("URL to probe for hidden parameters"),
        methods: String = "GET".to_string() => ConfigField::select("HTTP Method")
            .describe("Request method used while probing")
            .choices(&["GET", "POST"]),
        delay: u32 = 2 => ConfigField::number("Delay (seconds)")
            .describe("Delay between requests")
            .range(0.0, 60.0),
    }
}

/// Hidden HTTP parameter discovery with arjun.
pub struct ArjunNode {
    config: ArjunConfig,
}

impl ArjunNode {
    fn command_template(&self) -> String {
        format!(
            "arjun -u \"{{{{input}}}}\" -m {} --delay {}",
            self.config.methods, self.config.delay
        )
    }
}

impl Builtin for ArjunNode {
    const TYPE: &'static str = "arjun";

    type Config = ArjunConfig;

    fn with_config(config: ArjunConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<ArjunConfig>(
            Self::TYPE,
            NodeCategory::Analysis,
            "Arjun",
            "HTTP parameter discovery suite",
            "key",
            target_input("URLs to probe"),
            vec![PortDefinition::new("parameters", "array")
                .required()
                .describe("Discovered parameter names")],
        )
    }
}

#[async_trait]
impl Node for ArjunNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let profile = ToolProfile::ANALYSIS;
        let command = build_command(
            &ctx,
            &profile,
            &self.command_template(),
            self.config.url.as_deref(),
        )?;
        run_tool(&ctx, &profile, &command, parse_parameters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcore::{ConfigSchema, EventEmitter, NodeError, WorkflowNode};
    use serde_json::json;

    fn config<C: ConfigSchema>(value: serde_json::Value) -> C {
        C::from_config(value.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_nuclei_command() {
        let node = NucleiNode::with_config(config(json!({
            "severity": ["high", "critical"],
            "tags": "cve",
            "exclude_tags": "dos",
            "headers": "X-Scan: 1\nCookie: a=b",
        })));
        assert_eq!(
            node.command_template(),
            "nuclei -u \"{{input}}\" -severity high,critical -json -tags cve -exclude-tags dos \
             -rate-limit 150 -timeout 5 -H \"X-Scan: 1\" -H \"Cookie: a=b\""
        );
    }

    #[test]
    fn test_nuclei_empty_severity_means_all() {
        let node = NucleiNode::with_config(config(json!({"severity": []})));
        assert!(node
            .command_template()
            .contains("-severity info,low,medium,high,critical"));
    }

    #[test]
    fn test_nuclei_rejects_unknown_severity() {
        let node = WorkflowNode::new("scan", "nuclei").with_config("severity", json!(["urgent"]));
        assert!(matches!(
            NucleiNode::parse(&node),
            Err(NodeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ffuf_command() {
        let node = FfufNode::with_config(config(json!({
            "threads": 10,
            "delay": 0.5,
            "extensions": ".php",
            "match_codes": "200,301",
        })));
        assert_eq!(
            node.command_template(),
            "ffuf -u \"{{input}}\" -w /usr/share/wordlists/dirb/common.txt -t 10 -p 0.5 -e .php \
             -fc 404 -mc 200,301 -o /tmp/ffuf_output.json -of json"
        );
    }

    #[test]
    fn test_arjun_command() {
        let node = ArjunNode::with_config(config(json!({"methods": "POST"})));
        assert_eq!(
            node.command_template(),
            "arjun -u \"{{input}}\" -m POST --delay 2"
        );
    }

    #[tokio::test]
    async fn test_missing_target_fails_before_submitting() {
        let node = NucleiNode::with_config(NucleiConfig::default());
        let ctx = NodeContext::new(
            WorkflowNode::new("scan", "nuclei"),
            EventEmitter::detached("scan"),
        );
        let failure = node.execute(ctx).await.unwrap_err();
        assert!(matches!(failure.error, NodeError::Configuration(_)));
    }
}
