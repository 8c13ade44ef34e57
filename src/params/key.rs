//! Structured parameter keys.
//!
//! A key names one tensor by component namespace, role, layer id and, for
//! stacked layers, the 1-based unit index.

use std::fmt;
use std::sync::Arc;

/// The part a tensor plays inside a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Input → gates.
    W,
    /// Gate bias.
    B,
    /// Hidden → gates.
    U,
    /// Input → candidate.
    Wx,
    /// Candidate bias.
    Bx,
    /// Hidden → candidate.
    Ux,
    /// Context → gates.
    Wc,
    /// Context → candidate.
    Wcx,
    /// Hidden → gates, post-attention stage.
    UNl,
    /// Gate bias, post-attention stage.
    BNl,
    /// Hidden → candidate, post-attention stage.
    UxNl,
    /// Candidate bias, post-attention stage.
    BxNl,
    /// Attention query projection.
    WCombAtt,
    /// Attention source projection.
    WcAtt,
    /// Attention source bias.
    BAtt,
    /// Attention scoring vector.
    UAtt,
    /// Attention scoring bias.
    CTt,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::W => "W",
            Role::B => "b",
            Role::U => "U",
            Role::Wx => "Wx",
            Role::Bx => "bx",
            Role::Ux => "Ux",
            Role::Wc => "Wc",
            Role::Wcx => "Wcx",
            Role::UNl => "U_nl",
            Role::BNl => "b_nl",
            Role::UxNl => "Ux_nl",
            Role::BxNl => "bx_nl",
            Role::WCombAtt => "W_comb_att",
            Role::WcAtt => "Wc_att",
            Role::BAtt => "b_att",
            Role::UAtt => "U_att",
            Role::CTt => "c_tt",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key of one tensor in a [`ParameterSet`](super::ParameterSet).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParamKey {
    pub component: Arc<str>,
    pub role: Role,
    pub layer_id: usize,
    pub unit: Option<usize>,
}

impl ParamKey {
    pub fn new(component: &Arc<str>, role: Role, layer_id: usize) -> Self {
        Self {
            component: Arc::clone(component),
            role,
            layer_id,
            unit: None,
        }
    }

    /// Same key, scoped to a unit of a stacked layer.
    pub fn with_unit(mut self, unit: Option<usize>) -> Self {
        self.unit = unit;
        self
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}[{}]", self.component, self.role, self.layer_id)?;
        if let Some(unit) = self.unit {
            write!(f, "#{}", unit)?;
        }
        Ok(())
    }
}

/// Keys of one layer unit: component, layer id and unit are fixed, the role varies.
#[derive(Clone, Debug)]
pub struct KeyScope {
    component: Arc<str>,
    layer_id: usize,
    unit: Option<usize>,
}

impl KeyScope {
    pub fn new(component: &Arc<str>, layer_id: usize, unit: Option<usize>) -> Self {
        Self {
            component: Arc::clone(component),
            layer_id,
            unit,
        }
    }

    pub fn key(&self, role: Role) -> ParamKey {
        ParamKey::new(&self.component, role, self.layer_id).with_unit(self.unit)
    }

    /// The same layer without a unit index (shared tensors of a stack).
    pub fn shared(&self) -> Self {
        Self {
            unit: None,
            ..self.clone()
        }
    }

    pub fn unit(&self) -> Option<usize> {
        self.unit
    }
}
