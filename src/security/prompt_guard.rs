//! Prompt injection defense — layered pattern matching over free text.
//!
//! Five ordered rule layers run over the full untruncated prompt before it
//! is ever handed to the AI editor: credential extraction, instruction
//! override, role hijack, embedded command injection, and sensitive-file /
//! exfiltration requests. Evaluation stops at the first match.
//!
//! This is advisory defense-in-depth, not a provable boundary: no finite
//! rule set can enumerate every natural-language injection framing. The goal
//! is to catch the common, automatable attack patterns cheaply; the sandbox
//! and command policy remain the hard barriers behind it.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Rule layer identifiers, in evaluation order (cheapest-to-match attack
/// categories first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardLayer {
    CredentialExtraction,
    InstructionOverride,
    RoleHijack,
    CommandInjection,
    DataExfiltration,
}

impl GuardLayer {
    /// 1-based layer index, matching the documented evaluation order.
    pub fn index(self) -> u8 {
        match self {
            Self::CredentialExtraction => 1,
            Self::InstructionOverride => 2,
            Self::RoleHijack => 3,
            Self::CommandInjection => 4,
            Self::DataExfiltration => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CredentialExtraction => "credential_extraction",
            Self::InstructionOverride => "instruction_override",
            Self::RoleHijack => "role_hijack",
            Self::CommandInjection => "command_injection",
            Self::DataExfiltration => "data_exfiltration",
        }
    }
}

impl fmt::Display for GuardLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one scanned prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptVerdict {
    Clean,
    Blocked {
        layer: GuardLayer,
        rule: &'static str,
    },
}

impl PromptVerdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// One table row: stable rule id + pattern source. Patterns are compiled
/// case-insensitively. Keeping the rules as data (rather than branches)
/// lets them be audited and tested independently of the scanning engine.
struct Rule {
    id: &'static str,
    pattern: &'static str,
}

const CREDENTIAL_EXTRACTION_RULES: &[Rule] = &[
    Rule {
        id: "token-request",
        pattern: r"(show|reveal|print|display|output|give|tell|leak|expose)\s*(me\s*)?(the\s*|your\s*)?token",
    },
    Rule {
        id: "env-dump",
        pattern: r"\bprintenv\b|print\s*env\b|show\s+environment|list\s+env\b|os\.environ|process\.env|getenv\s*\(",
    },
    Rule {
        id: "env-echo",
        pattern: r"echo\s*\$",
    },
    Rule {
        id: "env-file-read",
        pattern: r"(read|cat|show|print|type)\s+\.env",
    },
    Rule {
        id: "api-key-request",
        pattern: r"\b(api|secret)\s*key\b",
    },
    Rule {
        id: "bot-token-request",
        pattern: r"\b(bot|access|auth)\s*token\b",
    },
    Rule {
        id: "password-request",
        pattern: r"\bpasswords?\b",
    },
    Rule {
        id: "private-key-request",
        pattern: r"\b(ssh|private)\s*keys?\b",
    },
];

const INSTRUCTION_OVERRIDE_RULES: &[Rule] = &[
    Rule {
        id: "ignore-instructions",
        pattern: r"(ignore|disregard|forget)\s+(all\s+|previous\s+|prior\s+|above\s+)*(instructions?|prompts?|rules?)",
    },
    Rule {
        id: "system-prompt-leak",
        pattern: r"(show|reveal|print|repeat)\s*(me\s*)?(your\s*|the\s*)?(system\s*prompt|initial\s+instructions)",
    },
    Rule {
        id: "instructions-probe",
        pattern: r"what\s+(are|were)\s+(your|the)\s+instructions",
    },
    Rule {
        id: "rules-probe",
        pattern: r"tell\s+me\s+your\s+rules",
    },
    Rule {
        id: "safety-override",
        pattern: r"(bypass|override)\s+(restrictions?|safety|rules?)",
    },
];

const ROLE_HIJACK_RULES: &[Rule] = &[
    Rule {
        id: "pretend",
        pattern: r"pretend\s+(you\s*'?\s*re|you\s+are|to\s+be)",
    },
    Rule {
        id: "act-as-if",
        pattern: r"act\s+as\s+if",
    },
    Rule {
        id: "roleplay",
        pattern: r"roleplay\s+as",
    },
    Rule {
        id: "you-are-now",
        pattern: r"you\s+are\s+now\b",
    },
    Rule {
        id: "special-mode",
        pattern: r"\b(dan|developer|debug|admin|unrestricted)\s+mode\b",
    },
    Rule {
        id: "no-restrictions",
        pattern: r"(no|without|have\s+no)\s+(restrictions?|limits?|safety)",
    },
    Rule {
        id: "disable-safety",
        pattern: r"(disable|turn\s+off)\s+(filters?|safety)",
    },
];

const COMMAND_INJECTION_RULES: &[Rule] = &[
    Rule {
        id: "chained-destructive",
        pattern: r"[;&|]\s*(rm|del|format|shutdown|reboot)\b",
    },
    Rule {
        id: "command-substitution",
        pattern: r"\$\([^)]*\)",
    },
    Rule {
        id: "backtick-execution",
        pattern: r"`[^`]+`",
    },
    Rule {
        id: "mass-delete",
        pattern: r"(delete|remove|erase|destroy|wipe)\s+(all|every|everything|\*)",
    },
    Rule {
        id: "network-tool",
        pattern: r"\b(wget|netcat)\b|\bnc\s+-",
    },
    Rule {
        id: "code-execution",
        pattern: r"\b(exec|eval)\s*\(|os\.system|\bsubprocess\b|__import__|popen\s*\(",
    },
];

const DATA_EXFILTRATION_RULES: &[Rule] = &[
    Rule {
        id: "env-file",
        pattern: r"\.env\b",
    },
    Rule {
        id: "ssh-key-file",
        pattern: r"\b(id_rsa|id_ed25519|known_hosts|authorized_keys)\b",
    },
    Rule {
        id: "key-material-file",
        pattern: r"\.(pem|key)\b",
    },
    Rule {
        id: "credential-dir",
        pattern: r"\.(ssh|aws|gnupg)/",
    },
    Rule {
        id: "secrets-file",
        pattern: r"\bsecrets?\.(json|ya?ml|xml)\b",
    },
    Rule {
        id: "dotfile-credentials",
        pattern: r"\.git/config|\.gitconfig|\.npmrc|\.pypirc",
    },
    Rule {
        id: "send-out",
        pattern: r"(send|upload|post)\s+(it\s+|this\s+|them\s+)?(to|via)\s+(http|email|server|webhook|api)",
    },
    Rule {
        id: "exfiltrate",
        pattern: r"\bexfiltrate\b",
    },
];

/// Layers in their fixed evaluation order.
const LAYERS: &[(GuardLayer, &[Rule])] = &[
    (GuardLayer::CredentialExtraction, CREDENTIAL_EXTRACTION_RULES),
    (GuardLayer::InstructionOverride, INSTRUCTION_OVERRIDE_RULES),
    (GuardLayer::RoleHijack, ROLE_HIJACK_RULES),
    (GuardLayer::CommandInjection, COMMAND_INJECTION_RULES),
    (GuardLayer::DataExfiltration, DATA_EXFILTRATION_RULES),
];

fn compiled_layers() -> &'static [(GuardLayer, Vec<(&'static str, Regex)>)] {
    static COMPILED: OnceLock<Vec<(GuardLayer, Vec<(&'static str, Regex)>)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        LAYERS
            .iter()
            .map(|(layer, rules)| {
                let compiled = rules
                    .iter()
                    .map(|rule| {
                        (
                            rule.id,
                            Regex::new(&format!("(?i){}", rule.pattern)).unwrap(),
                        )
                    })
                    .collect();
                (*layer, compiled)
            })
            .collect()
    })
}

/// Layered prompt scanner. Stateless per call; the rule tables are compiled
/// once at first use.
#[derive(Debug, Clone)]
pub struct PromptGuard {
    strict: bool,
}

impl Default for PromptGuard {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PromptGuard {
    /// `strict` keeps the documented block-on-match behavior. Non-strict
    /// deployments may pair a `Blocked` verdict with [`Self::sanitize`]
    /// instead of refusing outright.
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Scan a prompt. The first matching rule wins and short-circuits the
    /// remaining layers; an empty prompt is clean.
    pub fn scan(&self, text: &str) -> PromptVerdict {
        if text.trim().is_empty() {
            return PromptVerdict::Clean;
        }

        for (layer, rules) in compiled_layers() {
            for (id, pattern) in rules {
                if pattern.is_match(text) {
                    return PromptVerdict::Blocked {
                        layer: *layer,
                        rule: id,
                    };
                }
            }
        }

        PromptVerdict::Clean
    }

    /// Best-effort removal of shell metacharacters and line breaks from a
    /// prompt. Exposed for the IDE-bridge collaborator; the gate itself only
    /// ever blocks and never forwards sanitized text.
    pub fn sanitize(&self, text: &str) -> String {
        static SUBSTITUTION: OnceLock<Regex> = OnceLock::new();
        static METACHARS: OnceLock<Regex> = OnceLock::new();
        static SPACES: OnceLock<Regex> = OnceLock::new();

        let substitution =
            SUBSTITUTION.get_or_init(|| Regex::new(r"\$\([^)]*\)|`[^`]*`|\$\{[^}]*\}").unwrap());
        let metachars = METACHARS.get_or_init(|| Regex::new(r"[;&|`$<>]").unwrap());
        let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").unwrap());

        let cleaned = substitution.replace_all(text, "");
        let cleaned = metachars.replace_all(&cleaned, "");
        let cleaned = cleaned.replace(['\n', '\r'], " ");
        spaces.replace_all(&cleaned, " ").trim().to_string()
    }
}
