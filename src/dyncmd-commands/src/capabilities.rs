//! Capability table handed to handlers.
//!
//! Handlers get no ambient helpers. Everything they may use beyond their
//! arguments is listed here by name, either as a constant value or as a
//! function over JSON values.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde_json::{Value, json};

/// A callable capability.
pub type CapabilityFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// One exposed symbol.
#[derive(Clone)]
pub enum Capability {
    Value(Value),
    Function(CapabilityFn),
}

impl Capability {
    /// Wrap a closure as a function capability.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Capability::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Symbol name to capability.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: BTreeMap<String, Capability>,
}

impl CapabilityTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The helpers every handler gets: the live prefix plus math, random and
    /// string functions.
    pub fn standard(prefix: &str) -> Self {
        let mut table = Self::new();
        table.insert("prefix", Capability::Value(json!(prefix)));

        table.insert("abs", Capability::function(|args| {
            let x = number_arg(args, 0)?;
            Ok(json!(x.abs()))
        }));
        table.insert("min", Capability::function(|args| fold_numbers(args, f64::min)));
        table.insert("max", Capability::function(|args| fold_numbers(args, f64::max)));
        table.insert("pow", Capability::function(|args| {
            Ok(json!(number_arg(args, 0)?.powf(number_arg(args, 1)?)))
        }));
        table.insert("round", Capability::function(|args| {
            Ok(json!(number_arg(args, 0)?.round() as i64))
        }));

        table.insert("randint", Capability::function(|args| {
            let lo = int_arg(args, 0)?;
            let hi = int_arg(args, 1)?;
            if lo > hi {
                return Err(format!("randint: empty range {lo}..={hi}"));
            }
            Ok(json!(rand::rng().random_range(lo..=hi)))
        }));
        table.insert("choice", Capability::function(|args| {
            let items = array_arg(args, 0)?;
            items
                .choose(&mut rand::rng())
                .cloned()
                .ok_or_else(|| "choice: empty sequence".to_string())
        }));

        table.insert("lower", Capability::function(|args| {
            Ok(json!(str_arg(args, 0)?.to_lowercase()))
        }));
        table.insert("upper", Capability::function(|args| {
            Ok(json!(str_arg(args, 0)?.to_uppercase()))
        }));
        table.insert("join", Capability::function(|args| {
            let sep = str_arg(args, 0)?;
            let parts: Vec<String> = array_arg(args, 1)?
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            Ok(json!(parts.join(sep)))
        }));
        table.insert("split", Capability::function(|args| {
            let text = str_arg(args, 0)?;
            let parts: Vec<&str> = match args.get(1).and_then(Value::as_str) {
                Some(sep) => text.split(sep).collect(),
                None => text.split_whitespace().collect(),
            };
            Ok(json!(parts))
        }));
        table.insert("getitem", Capability::function(|args| {
            let container = args.first().ok_or("getitem: missing container")?;
            let key = args.get(1).ok_or("getitem: missing key")?;
            let item = match (container, key) {
                (Value::Array(items), Value::Number(n)) => {
                    n.as_u64().and_then(|i| items.get(i as usize))
                }
                (Value::Object(map), Value::String(k)) => map.get(k),
                _ => None,
            };
            item.cloned()
                .ok_or_else(|| format!("getitem: no item {key}"))
        }));

        table
    }

    /// Add or replace a symbol.
    pub fn insert(&mut self, name: impl Into<String>, capability: Capability) {
        self.entries.insert(name.into(), capability);
    }

    /// Builder form of [`CapabilityTable::insert`].
    pub fn with(mut self, name: impl Into<String>, capability: Capability) -> Self {
        self.insert(name, capability);
        self
    }

    /// Copy every entry of `other` into this table, replacing clashes.
    pub fn extend(&mut self, other: &CapabilityTable) {
        for (name, capability) in &other.entries {
            self.entries.insert(name.clone(), capability.clone());
        }
    }

    /// Look up a symbol.
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.get(name)
    }

    /// Value of a constant symbol.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.entries.get(name)? {
            Capability::Value(v) => Some(v),
            Capability::Function(_) => None,
        }
    }

    /// Call a function symbol.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, String> {
        match self.entries.get(name) {
            Some(Capability::Function(f)) => f(args),
            Some(Capability::Value(_)) => Err(format!("'{name}' is not callable")),
            None => Err(format!("'{name}' is not available")),
        }
    }

    /// Exposed symbol names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn number_arg(args: &[Value], i: usize) -> Result<f64, String> {
    args.get(i)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("argument {i} must be a number"))
}

fn int_arg(args: &[Value], i: usize) -> Result<i64, String> {
    args.get(i)
        .and_then(Value::as_i64)
        .ok_or_else(|| format!("argument {i} must be an integer"))
}

fn str_arg(args: &[Value], i: usize) -> Result<&str, String> {
    args.get(i)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("argument {i} must be a string"))
}

fn array_arg(args: &[Value], i: usize) -> Result<&Vec<Value>, String> {
    args.get(i)
        .and_then(Value::as_array)
        .ok_or_else(|| format!("argument {i} must be an array"))
}

fn fold_numbers(args: &[Value], f: fn(f64, f64) -> f64) -> Result<Value, String> {
    let mut numbers = args.iter().map(|v| v.as_f64().ok_or("arguments must be numbers"));
    let first = numbers.next().ok_or("at least one argument is required")??;
    let result = numbers.try_fold(first, |acc, n| n.map(|n| f(acc, n)))?;
    Ok(json!(result))
}
