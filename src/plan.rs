//! What gets provisioned: components, constructor arguments, the wiring batch,
//! and the external addresses they refer to.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::errors::{PlanError, StepError};
use crate::types::{ContractAddress, Felt};

/// Target chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Mainnet,
    Sepolia,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Mainnet => "mainnet",
            Chain::Sepolia => "sepolia",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Chain::Mainnet),
            "sepolia" => Ok(Chain::Sepolia),
            other => Err(format!("unknown network '{other}', expected mainnet or sepolia")),
        }
    }
}

/// A constructor or call argument, resolved to a felt at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// The signer account's address.
    Signer,
    /// A named external address from the plan.
    External(String),
    /// The address of a component deployed earlier in this run.
    Component(String),
    /// `0x0`, to be replaced by the configuration batch.
    Placeholder,
    Felt(Felt),
}

impl Arg {
    pub fn external(name: &str) -> Self {
        Arg::External(name.to_string())
    }

    pub fn component(name: &str) -> Self {
        Arg::Component(name.to_string())
    }

    pub fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Felt, StepError> {
        match self {
            Arg::Signer => Ok(ctx.signer.felt()),
            Arg::External(name) => ctx
                .external
                .get(name)
                .map(ContractAddress::felt)
                .ok_or_else(|| StepError::MissingExternal(name.clone())),
            Arg::Component(name) => ctx
                .deployed
                .get(name)
                .map(ContractAddress::felt)
                .ok_or_else(|| StepError::MissingDeployment(name.clone())),
            Arg::Placeholder => Ok(Felt::ZERO),
            Arg::Felt(felt) => Ok(*felt),
        }
    }
}

/// Addresses available when arguments are resolved.
pub struct ResolveContext<'a> {
    pub signer: ContractAddress,
    pub external: &'a BTreeMap<String, ContractAddress>,
    pub deployed: &'a HashMap<String, ContractAddress>,
}

pub fn resolve_all(
    args: &[(String, Arg)],
    ctx: &ResolveContext<'_>,
) -> Result<Vec<Felt>, StepError> {
    args.iter().map(|(_, arg)| arg.resolve(ctx)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpec {
    pub name: String,
    /// Named constructor arguments in declaration order.
    pub constructor: Vec<(String, Arg)>,
}

impl ComponentSpec {
    pub fn new(name: &str, constructor: Vec<(&str, Arg)>) -> Self {
        Self {
            name: name.to_string(),
            constructor: named(constructor),
        }
    }
}

/// One call of the configuration batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCall {
    pub target: String,
    pub entrypoint: String,
    pub args: Vec<(String, Arg)>,
}

impl ConfigCall {
    pub fn new(target: &str, entrypoint: &str, args: Vec<(&str, Arg)>) -> Self {
        Self {
            target: target.to_string(),
            entrypoint: entrypoint.to_string(),
            args: named(args),
        }
    }
}

fn named(args: Vec<(&str, Arg)>) -> Vec<(String, Arg)> {
    args.into_iter()
        .map(|(name, arg)| (name.to_string(), arg))
        .collect()
}

#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub chain: Chain,
    /// Components in dependency order: declared and deployed in this order.
    pub components: Vec<ComponentSpec>,
    pub configuration: Vec<ConfigCall>,
    pub external: BTreeMap<String, ContractAddress>,
}

impl DeploymentPlan {
    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.name.as_str())
    }

    /// Check names, references and ordering before anything touches the network.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.components.is_empty() {
            return Err(PlanError::Empty);
        }

        let all: HashSet<&str> = self.component_names().collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for component in &self.components {
            if !seen.insert(component.name.as_str()) {
                return Err(PlanError::DuplicateComponent(component.name.clone()));
            }
            for (_, arg) in &component.constructor {
                match arg {
                    Arg::Component(dep) if !all.contains(dep.as_str()) => {
                        return Err(PlanError::UnknownComponent {
                            referenced_by: component.name.clone(),
                            name: dep.clone(),
                        });
                    }
                    Arg::Component(dep) if !seen.contains(dep.as_str()) || dep == &component.name => {
                        return Err(PlanError::ForwardReference {
                            component: component.name.clone(),
                            depends_on: dep.clone(),
                        });
                    }
                    _ => self.check_external(&component.name, arg)?,
                }
            }
        }

        for call in &self.configuration {
            let referenced_by = format!("{}.{}", call.target, call.entrypoint);
            if !all.contains(call.target.as_str()) {
                return Err(PlanError::UnknownComponent {
                    referenced_by,
                    name: call.target.clone(),
                });
            }
            for (_, arg) in &call.args {
                if let Arg::Component(dep) = arg
                    && !all.contains(dep.as_str())
                {
                    return Err(PlanError::UnknownComponent {
                        referenced_by,
                        name: dep.clone(),
                    });
                }
                self.check_external(&referenced_by, arg)?;
            }
        }
        Ok(())
    }

    fn check_external(&self, referenced_by: &str, arg: &Arg) -> Result<(), PlanError> {
        match arg {
            Arg::External(name) if !self.external.contains_key(name) => {
                Err(PlanError::UnknownExternal {
                    referenced_by: referenced_by.to_string(),
                    name: name.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// The BTC vault system: a master vault, two yield strategies and a router.
    pub fn btc_vault(chain: Chain) -> Result<Self, PlanError> {
        let (wbtc, vtoken, usdc) = match chain {
            Chain::Mainnet => (
                "0x03fe2b97c1fd336e750087d68b9b867997fd64a2661ff3ca5a7c771641e8e7ac",
                "0x06b0ef784eb49c85f4d9447f30d7f7212be65ce1e553c18d516c87131e81dbd6",
                "0x053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8",
            ),
            Chain::Sepolia => (
                "0x63d32a3fa6074e72e7a1e06fe78c46a0c8473217773e19f11d8c8cbfc4ff8ca",
                "0x5868ed6b7c57ac071bf6bfe762174a2522858b700ba9fb062709e63b65bf186",
                "0x27ef4670397069d7d5442cb7945b27338692de0d8896bdb15e6400cf5249f94",
            ),
        };
        let mut external = BTreeMap::new();
        for (name, raw) in [("WBTC", wbtc), ("WBTC_vToken", vtoken), ("USDC", usdc)] {
            let address = raw.parse().map_err(|source| PlanError::InvalidAddress {
                name: name.to_string(),
                source,
            })?;
            external.insert(name.to_string(), address);
        }

        // sepolia deploys the router before wiring it to the vault
        let router_vault = match chain {
            Chain::Mainnet => Arg::component("BTCVault"),
            Chain::Sepolia => Arg::Placeholder,
        };

        let components = vec![
            ComponentSpec::new(
                "BTCVault",
                vec![("owner", Arg::Signer), ("wbtc_token", Arg::external("WBTC"))],
            ),
            ComponentSpec::new(
                "VesuStrategy",
                vec![
                    ("owner", Arg::Signer),
                    ("wbtc_token", Arg::external("WBTC")),
                    ("vtoken", Arg::external("WBTC_vToken")),
                ],
            ),
            ComponentSpec::new(
                "EkuboStrategy",
                vec![
                    ("owner", Arg::Signer),
                    ("wbtc_token", Arg::external("WBTC")),
                    ("pair_token", Arg::external("USDC")),
                ],
            ),
            ComponentSpec::new(
                "Router",
                vec![
                    ("owner", Arg::Signer),
                    ("wbtc_token", Arg::external("WBTC")),
                    ("vault", router_vault),
                ],
            ),
        ];

        let strategies = || {
            vec![
                ("vesu_strategy", Arg::component("VesuStrategy")),
                ("ekubo_strategy", Arg::component("EkuboStrategy")),
            ]
        };
        let mut configuration = vec![
            ConfigCall::new("BTCVault", "set_strategies", strategies()),
            ConfigCall::new(
                "BTCVault",
                "set_router",
                vec![("router", Arg::component("Router"))],
            ),
            ConfigCall::new("Router", "set_strategies", strategies()),
            ConfigCall::new(
                "VesuStrategy",
                "set_vault",
                vec![("vault", Arg::component("BTCVault"))],
            ),
            ConfigCall::new(
                "EkuboStrategy",
                "set_vault",
                vec![("vault", Arg::component("BTCVault"))],
            ),
        ];
        if chain == Chain::Sepolia {
            configuration.push(ConfigCall::new(
                "Router",
                "set_vault",
                vec![("vault", Arg::component("BTCVault"))],
            ));
        }

        let plan = Self {
            chain,
            components,
            configuration,
            external,
        };
        plan.validate()?;
        Ok(plan)
    }
}
