use serde::Serialize;

/// Transcript of one role in a multi-model turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleTranscript {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandoffRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestrationError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub message: String,
}

/// Multi-model orchestration progress for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestrationState {
    pub active: bool,
    pub planned_roles: Vec<String>,
    /// In order of first appearance.
    pub roles: Vec<RoleTranscript>,
    pub handoffs: Vec<HandoffRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_model: Option<String>,
    pub errors: Vec<OrchestrationError>,
}

impl OrchestrationState {
    pub fn start(&mut self, roles: Vec<String>) {
        self.active = true;
        if !roles.is_empty() {
            self.planned_roles = roles;
        }
    }

    pub fn role_started(&mut self, role: &str, model: Option<String>) {
        self.active = true;
        let entry = self.role_entry(role);
        if model.is_some() {
            entry.model = model;
        }
        self.current_role = Some(role.to_string());
    }

    pub fn role_stream(&mut self, role: &str, text: &str) {
        self.role_entry(role).transcript.push_str(text);
        if self.current_role.is_none() {
            self.current_role = Some(role.to_string());
        }
    }

    pub fn handoff(&mut self, from: Option<String>, to: String, reason: Option<String>) {
        tracing::debug!(from = from.as_deref(), to = %to, "multi-model handoff");
        self.role_entry(&to);
        self.current_role = Some(to.clone());
        self.handoffs.push(HandoffRecord { from, to, reason });
    }

    pub fn complete(&mut self, model: Option<String>) {
        self.active = false;
        if model.is_some() {
            self.completed_model = model;
        }
    }

    /// Orchestration errors do not end the turn.
    pub fn error(&mut self, role: Option<String>, message: String) {
        tracing::warn!(role = role.as_deref(), "multi-model error: {message}");
        self.errors.push(OrchestrationError { role, message });
    }

    /// Transcript of the most recently active role, if it produced any text.
    #[must_use]
    pub fn last_role_transcript(&self) -> Option<&str> {
        self.last_role()
            .map(|role| role.transcript.as_str())
            .filter(|text| !text.trim().is_empty())
    }

    #[must_use]
    pub fn last_role_model(&self) -> Option<&str> {
        self.last_role().and_then(|role| role.model.as_deref())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.active && self.roles.is_empty() && self.errors.is_empty()
    }

    fn last_role(&self) -> Option<&RoleTranscript> {
        match &self.current_role {
            Some(current) => self.roles.iter().find(|r| &r.role == current),
            None => self.roles.last(),
        }
    }

    fn role_entry(&mut self, role: &str) -> &mut RoleTranscript {
        let position = match self.roles.iter().position(|r| r.role == role) {
            Some(position) => position,
            None => {
                self.roles.push(RoleTranscript {
                    role: role.to_string(),
                    ..RoleTranscript::default()
                });
                self.roles.len() - 1
            }
        };
        &mut self.roles[position]
    }
}
