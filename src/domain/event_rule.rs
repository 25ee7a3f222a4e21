//! Event authorization rules and payload constraints.
//!
//! An [`EventRule`] names the roles allowed to emit an inbound event and an
//! optional per-role [`Validation`]. Constraints are a serde-tagged enum so
//! the administrative surface can install rules from JSON; role names in
//! that JSON are checked before any rule is built.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Connection, Role};

/// Errors raised while building a rule from administrative input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// The event name is blank.
    #[error("event name must not be empty")]
    EmptyEventName,
    /// No role may emit the event.
    #[error("rule for {0} must allow at least one role")]
    NoRoles(String),
    /// A role name is not recognised.
    #[error("unknown role: {0}")]
    UnknownRole(String),
    /// Per-role validation was given for a role the rule does not allow.
    #[error("validation given for role {role} which is not allowed to emit {event}")]
    ValidationForDisallowedRole {
        /// Offending role.
        role: Role,
        /// Rule event name.
        event: String,
    },
    /// A constraint is malformed.
    #[error("invalid constraint on {field}: {reason}")]
    InvalidConstraint {
        /// Constrained field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The named rule does not exist.
    #[error("no rule for event {0}")]
    NotFound(String),
}

/// Whose identity a `not_self` constraint compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SelfTarget {
    /// The emitting connection's id.
    Connection,
    /// The emitting user's id.
    User,
}

/// A single structural check applied to an event payload.
///
/// Fields are top-level keys or dotted paths into nested objects. Bounds
/// and enumerations only apply when the field is present; pair them with
/// [`Constraint::Required`] to demand the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Field must be present, non-null and not an empty string.
    Required {
        /// Constrained field.
        field: String,
    },
    /// Numeric ceiling.
    Max {
        /// Constrained field.
        field: String,
        /// Inclusive maximum.
        max: f64,
    },
    /// Numeric floor.
    Min {
        /// Constrained field.
        field: String,
        /// Inclusive minimum.
        min: f64,
    },
    /// Field must equal one of the listed values.
    OneOf {
        /// Constrained field.
        field: String,
        /// Permitted values.
        values: Vec<String>,
    },
    /// Field must not name the emitter itself.
    NotSelf {
        /// Constrained field.
        field: String,
        /// Identity compared against.
        target: SelfTarget,
    },
}

impl Constraint {
    /// Constrained field path.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Required { field }
            | Self::Max { field, .. }
            | Self::Min { field, .. }
            | Self::OneOf { field, .. }
            | Self::NotSelf { field, .. } => field,
        }
    }

    fn check_structure(&self) -> Result<(), RuleError> {
        let invalid = |reason: &str| RuleError::InvalidConstraint {
            field: self.field().to_string(),
            reason: reason.to_string(),
        };
        if self.field().trim().is_empty() {
            return Err(invalid("field must not be empty"));
        }
        match self {
            Self::Max { max: bound, .. } | Self::Min { min: bound, .. } if !bound.is_finite() => {
                Err(invalid("bound must be finite"))
            }
            Self::OneOf { values, .. } if values.is_empty() => {
                Err(invalid("one_of needs at least one value"))
            }
            _ => Ok(()),
        }
    }

    /// Checks `payload`, returning the client-facing message on failure.
    fn evaluate(
        &self,
        connection: &Connection,
        payload: &serde_json::Value,
    ) -> Result<(), String> {
        let field = self.field();
        let value = lookup(payload, field).filter(|v| !v.is_null());
        let role = connection.role();
        match self {
            Self::Required { .. } => match value {
                Some(serde_json::Value::String(s)) if s.trim().is_empty() => {
                    Err(format!("{} is required", label(field)))
                }
                Some(_) => Ok(()),
                None => Err(format!("{} is required", label(field))),
            },
            Self::Max { max, .. } => match value.map(as_number) {
                None => Ok(()),
                Some(None) => Err(format!("{} must be a number", label(field))),
                Some(Some(n)) if n > *max => Err(format!(
                    "{} exceeds maximum allowed for {role}: {max}",
                    label(field)
                )),
                Some(Some(_)) => Ok(()),
            },
            Self::Min { min, .. } => match value.map(as_number) {
                None => Ok(()),
                Some(None) => Err(format!("{} must be a number", label(field))),
                Some(Some(n)) if n < *min => Err(format!(
                    "{} is below minimum allowed for {role}: {min}",
                    label(field)
                )),
                Some(Some(_)) => Ok(()),
            },
            Self::OneOf { values, .. } => match value {
                None => Ok(()),
                Some(v) => {
                    let given = as_text(v);
                    if values.iter().any(|allowed| *allowed == given) {
                        Ok(())
                    } else {
                        Err(format!(
                            "Invalid {field} for {role}: {given}. Allowed: {}",
                            values.join(", ")
                        ))
                    }
                }
            },
            Self::NotSelf { target, .. } => {
                let Some(v) = value else {
                    return Ok(());
                };
                let given = as_text(v);
                match target {
                    SelfTarget::Connection if given == connection.id().to_string() => {
                        Err("Cannot target your own connection".to_string())
                    }
                    SelfTarget::User if given == connection.user_id().as_str() => {
                        Err("Cannot target yourself".to_string())
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

/// Walks a dotted path through nested JSON objects.
fn lookup<'a>(payload: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.')
        .try_fold(payload, |current, segment| current.get(segment))
}

fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human label for a field path: last segment, first letter upper-cased.
fn label(path: &str) -> String {
    let last = path.rsplit('.').next().unwrap_or(path);
    let mut chars = last.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Constraint set of a rule: checks for every role plus per-role checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    /// Applied to every allowed role, before the per-role checks.
    pub common: Vec<Constraint>,
    /// Applied only to the keyed role.
    pub per_role: BTreeMap<Role, Vec<Constraint>>,
}

impl Validation {
    /// Starts an empty validation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a check applied to every role.
    #[must_use]
    pub fn common(mut self, constraint: Constraint) -> Self {
        self.common.push(constraint);
        self
    }

    /// Adds a check applied to one role.
    #[must_use]
    pub fn for_role(mut self, role: Role, constraint: Constraint) -> Self {
        self.per_role.entry(role).or_default().push(constraint);
        self
    }

    /// Returns `true` when no constraint is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.common.is_empty() && self.per_role.values().all(Vec::is_empty)
    }

    /// Runs common then per-role constraints, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the client-facing message of the first failing constraint.
    pub fn check(&self, connection: &Connection, payload: &serde_json::Value) -> Result<(), String> {
        let role_specific = self
            .per_role
            .get(&connection.role())
            .map(Vec::as_slice)
            .unwrap_or_default();
        self.common
            .iter()
            .chain(role_specific)
            .try_for_each(|constraint| constraint.evaluate(connection, payload))
    }
}

/// Authorization rule for one inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRule {
    event_name: String,
    allowed_roles: BTreeSet<Role>,
    validation: Validation,
}

impl EventRule {
    /// Builds a rule, checking its structure.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when the name is empty, no role is allowed,
    /// a constraint is malformed, or per-role validation names a role
    /// outside `allowed_roles`.
    pub fn new(
        event_name: impl Into<String>,
        allowed_roles: impl IntoIterator<Item = Role>,
        validation: Validation,
    ) -> Result<Self, RuleError> {
        let event_name = event_name.into();
        if event_name.trim().is_empty() {
            return Err(RuleError::EmptyEventName);
        }
        let allowed_roles: BTreeSet<Role> = allowed_roles.into_iter().collect();
        if allowed_roles.is_empty() {
            return Err(RuleError::NoRoles(event_name));
        }
        if let Some(role) = validation
            .per_role
            .keys()
            .find(|role| !allowed_roles.contains(role))
        {
            return Err(RuleError::ValidationForDisallowedRole {
                role: *role,
                event: event_name,
            });
        }
        validation
            .common
            .iter()
            .chain(validation.per_role.values().flatten())
            .try_for_each(Constraint::check_structure)?;

        Ok(Self {
            event_name,
            allowed_roles,
            validation,
        })
    }

    /// Event this rule governs.
    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Roles permitted to emit the event.
    #[must_use]
    pub const fn allowed_roles(&self) -> &BTreeSet<Role> {
        &self.allowed_roles
    }

    /// Payload constraints.
    #[must_use]
    pub const fn validation(&self) -> &Validation {
        &self.validation
    }

    /// Returns `true` if `role` may emit the event.
    #[must_use]
    pub fn allows(&self, role: Role) -> bool {
        self.allowed_roles.contains(&role)
    }
}

/// Administrative JSON form of a rule, with role names as raw strings so
/// unknown names are reported instead of failing deserialization.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    /// Event name.
    pub event_name: String,
    /// Role names permitted to emit the event.
    pub allowed_roles: Vec<String>,
    /// Constraints for every role.
    #[serde(default)]
    pub common: Vec<Constraint>,
    /// Constraints keyed by role name.
    #[serde(default)]
    pub per_role: BTreeMap<String, Vec<Constraint>>,
}

impl TryFrom<RuleSpec> for EventRule {
    type Error = RuleError;

    fn try_from(spec: RuleSpec) -> Result<Self, Self::Error> {
        let parse = |name: &str| {
            name.parse::<Role>()
                .map_err(|_| RuleError::UnknownRole(name.to_string()))
        };
        let roles = spec
            .allowed_roles
            .iter()
            .map(|name| parse(name))
            .collect::<Result<Vec<_>, _>>()?;
        let mut validation = Validation {
            common: spec.common,
            per_role: BTreeMap::new(),
        };
        for (name, constraints) in spec.per_role {
            validation.per_role.insert(parse(&name)?, constraints);
        }
        Self::new(spec.event_name, roles, validation)
    }
}
