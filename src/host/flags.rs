//! Launch flags for a host IDE driven by the robot server
//!
//! The flags turn off everything that would block unattended automation:
//! sheet-style modal dialogs on macOS, the privacy policy prompt and the
//! data-sharing consent prompt.

use std::collections::BTreeMap;

use crate::common::config::HostConfig;

/// Policy text version that counts as already accepted
pub const ACCEPTED_POLICY_TEXT: &str = "<!--999.999-->";

/// System properties passed to the host at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchFlags {
    /// `robot-server.port`
    pub port: u16,
    /// `ide.mac.message.dialogs.as.sheets`
    pub dialogs_as_sheets: bool,
    /// `jb.privacy.policy.text`
    pub privacy_policy_text: Option<String>,
    /// `jb.consents.confirmation.enabled`
    pub consents_confirmation: bool,
    /// Any further `key=value` properties
    pub extra: BTreeMap<String, String>,
}

impl LaunchFlags {
    /// Non-interactive flags with the robot server on `port`
    pub fn for_automation(port: u16) -> Self {
        Self {
            port,
            dialogs_as_sheets: false,
            privacy_policy_text: Some(ACCEPTED_POLICY_TEXT.to_string()),
            consents_confirmation: false,
            extra: BTreeMap::new(),
        }
    }

    /// Automation flags using the port and extra properties from `[host]`
    pub fn from_config(host: &HostConfig) -> Self {
        Self {
            extra: host.extra_flags.clone(),
            ..Self::for_automation(host.port)
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Render as `-Dkey=value` arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("-Drobot-server.port={}", self.port),
            format!("-Dide.mac.message.dialogs.as.sheets={}", self.dialogs_as_sheets),
        ];
        if let Some(text) = &self.privacy_policy_text {
            args.push(format!("-Djb.privacy.policy.text={}", text));
        }
        args.push(format!(
            "-Djb.consents.confirmation.enabled={}",
            self.consents_confirmation
        ));
        args.extend(self.extra.iter().map(|(k, v)| format!("-D{}={}", k, v)));
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automation_flags() {
        assert_eq!(
            LaunchFlags::for_automation(8082).to_args(),
            vec![
                "-Drobot-server.port=8082",
                "-Dide.mac.message.dialogs.as.sheets=false",
                "-Djb.privacy.policy.text=<!--999.999-->",
                "-Djb.consents.confirmation.enabled=false",
            ]
        );
    }

    #[test]
    fn test_config_extras_and_port_override() {
        let mut host = HostConfig::default();
        host.extra_flags
            .insert("idea.trust.all.projects".to_string(), "true".to_string());

        let flags = LaunchFlags::from_config(&host).with_port(9999);
        let args = flags.to_args();
        assert_eq!(args[0], "-Drobot-server.port=9999");
        assert_eq!(args.last().unwrap(), "-Didea.trust.all.projects=true");
    }
}
