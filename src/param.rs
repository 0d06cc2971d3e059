//! Named parameter store: `/reader/...` paths with typed get/set, lazy
//! capability probing, and read-only enforcement.
//!
//! A [`ParameterRegistry`] has no internal locking of its own; `ReaderCore`
//! wraps one in a `Mutex` (see §5's "guarded by a separate mutex"). Keeping
//! the registry single-threaded in isolation is what lets `get`/`set` stay
//! simple straight-line algorithms.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::region::Region;
use crate::tag::ReadPlan;

/// A parameter's value, as either cached or passed to `set`.
///
/// Only the shapes this protocol actually uses get a variant; there's no
/// generic `Any` escape hatch.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Str(String),
    U32(u32),
    Bool(bool),
    Bytes(Vec<u8>),
    PortList(Vec<u32>),
    Region(Region),
    ReadPlan(Box<ReadPlan>),
    Duration(Duration),
}

impl ParamValue {
    fn same_shape_as(&self, other: &ParamValue) -> bool {
        matches!(
            (self, other),
            (ParamValue::Str(_), ParamValue::Str(_))
                | (ParamValue::U32(_), ParamValue::U32(_))
                | (ParamValue::Bool(_), ParamValue::Bool(_))
                | (ParamValue::Bytes(_), ParamValue::Bytes(_))
                | (ParamValue::PortList(_), ParamValue::PortList(_))
                | (ParamValue::Region(_), ParamValue::Region(_))
                | (ParamValue::ReadPlan(_), ParamValue::ReadPlan(_))
                | (ParamValue::Duration(_), ParamValue::Duration(_))
        )
    }
}

type GetHook = Box<dyn FnMut() -> Result<ParamValue> + Send>;
type SetHook = Box<dyn FnMut(ParamValue) -> Result<ParamValue> + Send>;

/// One registered parameter.
pub struct Parameter {
    /// Canonical (original-case) name, as returned by `list()`.
    canonical_name: String,
    value: ParamValue,
    writable: bool,
    /// False for a lazy parameter that hasn't been probed yet.
    confirmed: bool,
    get_hook: Option<GetHook>,
    set_hook: Option<SetHook>,
}

impl Parameter {
    fn type_name(&self) -> &'static str {
        match self.value {
            ParamValue::Str(_) => "string",
            ParamValue::U32(_) => "u32",
            ParamValue::Bool(_) => "bool",
            ParamValue::Bytes(_) => "bytes",
            ParamValue::PortList(_) => "port list",
            ParamValue::Region(_) => "region",
            ParamValue::ReadPlan(_) => "read plan",
            ParamValue::Duration(_) => "duration",
        }
    }
}

/// A named, case-insensitive, lazily-probed parameter store.
#[derive(Default)]
pub struct ParameterRegistry {
    params: BTreeMap<String, Parameter>,
}

impl ParameterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    /// Register an already-confirmed parameter (known to exist on every
    /// supported device).
    pub fn add_param(
        &mut self,
        name: &str,
        value: ParamValue,
        writable: bool,
        get_hook: Option<GetHook>,
        set_hook: Option<SetHook>,
    ) {
        self.params.insert(
            Self::key(name),
            Parameter {
                canonical_name: name.to_string(),
                value,
                writable,
                confirmed: true,
                get_hook,
                set_hook,
            },
        );
    }

    /// Register a lazy parameter whose existence depends on device
    /// capability. `value` is a placeholder used only until the first
    /// successful probe.
    pub fn add_unconfirmed_param(
        &mut self,
        name: &str,
        value: ParamValue,
        writable: bool,
        get_hook: Option<GetHook>,
        set_hook: Option<SetHook>,
    ) {
        self.params.insert(
            Self::key(name),
            Parameter {
                canonical_name: name.to_string(),
                value,
                writable,
                confirmed: false,
                get_hook,
                set_hook,
            },
        );
    }

    /// Names of every confirmed parameter, probing unconfirmed ones in a
    /// stable (name) order along the way.
    pub fn list(&mut self) -> Vec<String> {
        let keys: Vec<String> = self.params.keys().cloned().collect();
        for key in &keys {
            if self.params.get(key).is_some_and(|p| !p.confirmed) {
                let _ = self.probe(key);
            }
        }
        self.params
            .values()
            .filter(|p| p.confirmed)
            .map(|p| p.canonical_name.clone())
            .collect()
    }

    /// Probe an unconfirmed parameter once: success promotes it, any
    /// failure removes it permanently.
    fn probe(&mut self, key: &str) -> Result<()> {
        let Some(param) = self.params.get_mut(key) else {
            return Err(Error::UnknownParameter(key.to_string()));
        };
        let Some(hook) = param.get_hook.as_mut() else {
            param.confirmed = true;
            return Ok(());
        };
        match hook() {
            Ok(value) => {
                let param = self.params.get_mut(key).expect("just looked up");
                param.value = value;
                param.confirmed = true;
                trace!("param {key}: capability probe confirmed");
                Ok(())
            }
            Err(e) => {
                debug!("param {key}: capability probe failed, removing permanently: {e}");
                self.params.remove(key);
                Err(Error::UnknownParameter(key.to_string()))
            }
        }
    }

    /// Fetch a parameter's current value. If unconfirmed, the get-hook is
    /// invoked once by `probe` and that value is returned directly;
    /// otherwise the get-hook is called again here to refresh.
    pub fn get(&mut self, name: &str) -> Result<ParamValue> {
        let key = Self::key(name);
        if !self.params.contains_key(&key) {
            return Err(Error::UnknownParameter(name.to_string()));
        }
        let just_probed = if !self.params[&key].confirmed {
            self.probe(&key)?;
            true
        } else {
            false
        };
        let param = self
            .params
            .get_mut(&key)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))?;
        if !just_probed {
            if let Some(hook) = param.get_hook.as_mut() {
                param.value = hook()?;
            }
        }
        Ok(param.value.clone())
    }

    /// Set a parameter's value, probing it first if unconfirmed.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        let key = Self::key(name);
        if !self.params.contains_key(&key) {
            return Err(Error::UnknownParameter(name.to_string()));
        }
        if !self.params[&key].confirmed {
            self.probe(&key)?;
        }
        let param = self
            .params
            .get_mut(&key)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))?;
        if !param.writable {
            return Err(Error::ReadOnly(param.canonical_name.clone()));
        }
        if !param.value.same_shape_as(&value) {
            return Err(Error::TypeMismatch(format!(
                "{} expects a {}",
                param.canonical_name,
                param.type_name()
            )));
        }
        let stored = match param.set_hook.as_mut() {
            Some(hook) => hook(value)?,
            None => value,
        };
        param.value = stored;
        Ok(())
    }
}

impl Clone for ParamValue {
    fn clone(&self) -> Self {
        match self {
            ParamValue::Str(s) => ParamValue::Str(s.clone()),
            ParamValue::U32(v) => ParamValue::U32(*v),
            ParamValue::Bool(v) => ParamValue::Bool(*v),
            ParamValue::Bytes(v) => ParamValue::Bytes(v.clone()),
            ParamValue::PortList(v) => ParamValue::PortList(v.clone()),
            ParamValue::Region(v) => ParamValue::Region(*v),
            ParamValue::ReadPlan(v) => ParamValue::ReadPlan(v.clone()),
            ParamValue::Duration(v) => ParamValue::Duration(*v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(name: &str, value: ParamValue, writable: bool) -> ParameterRegistry {
        let mut reg = ParameterRegistry::new();
        reg.add_param(name, value, writable, None, None);
        reg
    }

    #[test]
    fn get_unknown_parameter_fails() {
        let mut reg = ParameterRegistry::new();
        assert!(matches!(reg.get("/reader/nope"), Err(Error::UnknownParameter(_))));
    }

    #[test]
    fn set_unknown_parameter_fails_and_registry_unchanged() {
        let mut reg = registry_with("/reader/commandTimeout", ParamValue::U32(1000), true);
        assert!(matches!(
            reg.set("/reader/nope", ParamValue::U32(1)),
            Err(Error::UnknownParameter(_))
        ));
        assert!(matches!(
            reg.get("/reader/commandTimeout").unwrap(),
            ParamValue::U32(1000)
        ));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut reg = registry_with("/reader/region/id", ParamValue::Region(Region::Na), true);
        assert!(matches!(
            reg.get("/READER/REGION/ID").unwrap(),
            ParamValue::Region(Region::Na)
        ));
    }

    #[test]
    fn set_read_only_parameter_fails() {
        let mut reg = registry_with(
            "/reader/version/software",
            ParamValue::Str("1.0.0".into()),
            false,
        );
        assert!(matches!(
            reg.set("/reader/version/software", ParamValue::Str("2.0.0".into())),
            Err(Error::ReadOnly(_))
        ));
    }

    #[test]
    fn set_wrong_shape_fails_type_mismatch() {
        let mut reg = registry_with("/reader/commandTimeout", ParamValue::U32(1000), true);
        assert!(matches!(
            reg.set("/reader/commandTimeout", ParamValue::Bool(true)),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut reg = registry_with("/reader/commandTimeout", ParamValue::U32(1000), true);
        reg.set("/reader/commandTimeout", ParamValue::U32(2000)).unwrap();
        assert!(matches!(reg.get("/reader/commandTimeout").unwrap(), ParamValue::U32(2000)));
    }

    #[test]
    fn failed_probe_removes_parameter_permanently() {
        let mut reg = ParameterRegistry::new();
        reg.add_unconfirmed_param(
            "/reader/currentProgram",
            ParamValue::U32(0),
            false,
            Some(Box::new(|| Err(Error::unsupported_code(0x0801)))),
            None,
        );
        assert!(reg.get("/reader/currentProgram").is_err());
        // Second call hits UnknownParameter directly; the parameter is gone.
        assert!(matches!(
            reg.get("/reader/currentProgram"),
            Err(Error::UnknownParameter(_))
        ));
    }

    #[test]
    fn successful_probe_promotes_and_lists() {
        let mut reg = ParameterRegistry::new();
        reg.add_unconfirmed_param(
            "/reader/currentProgram",
            ParamValue::U32(0),
            false,
            Some(Box::new(|| Ok(ParamValue::U32(7)))),
            None,
        );
        // `list()` probes unconfirmed parameters along the way, so the
        // successful probe promotes it on the very first call.
        assert_eq!(reg.list(), vec!["/reader/currentProgram".to_string()]);
        let v = reg.get("/reader/currentProgram").unwrap();
        assert!(matches!(v, ParamValue::U32(7)));
    }
}
