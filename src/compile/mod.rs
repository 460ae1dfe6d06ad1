//! # 展平编译器
//!
//! 按深度优先（父节点先于子节点）遍历包含层次，把每个节点网中的组件依次
//! 克隆进同一个可执行网：颜色、注释、库所、速率参数、迁移、输入弧、输出弧。
//! 克隆后的 id 为节点前缀与本地 id 的拼接，根节点前缀为空。
//!
//! 其它节点定义、在本节点物化的接口库所在克隆时被记为 `Away`，全部节点
//! 克隆完毕后统一重定向到对应的 `Home` 库所并删除。所有函数表达式在此时
//! 一次性解析与校验，外部迁移处理器也在此时实例化。最后按初始标识把
//! 已使能的定时迁移排入时间 0 的定时队列。

pub mod handler;

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use thiserror::Error;

use crate::anim::AnimationError;
use crate::exec::{ExecutableNet, Fingerprint, SourcePlace};
use crate::hierarchy::{HierarchyNode, IncludeHierarchy};
use crate::net::{
    Annotation, ComponentKind, Expr, ExprError, HomeRef, MergeInterfaceState, NodeId, Rate,
    RateParameter, qualify,
};

pub use handler::{ExternalTransition, HandlerRegistry};

/// Fatal flattening errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IncludeError {
    #[error("interface place `{away_id}` used by `{node}` has no home place in the hierarchy")]
    MissingHome { away_id: String, node: String },
    #[error("invalid expression on `{component}`: {source}")]
    InvalidExpression {
        component: String,
        #[source]
        source: ExprError,
    },
    #[error("expression on `{component}` references unknown place `{place}`")]
    UnknownPlace { component: String, place: String },
    #[error("expression on `{component}` references unknown color `{color}`")]
    UnknownColor { component: String, color: String },
    #[error("`{component}` references unknown rate parameter `{parameter}`")]
    UnknownParameter { component: String, parameter: String },
    #[error("rate parameters form a cycle through `{0}`")]
    ParameterCycle(String),
    #[error("arc `{arc}` references missing endpoint `{endpoint}`")]
    DanglingArc { arc: String, endpoint: String },
    #[error("flattened {kind} id `{id}` is not unique")]
    DuplicateId { id: String, kind: ComponentKind },
    #[error("cannot schedule the timed transitions of the initial marking: {0}")]
    Schedule(#[source] AnimationError),
    #[error("handler `{handler}` of transition `{transition}` cannot be loaded: {reason}")]
    Handler {
        transition: String,
        handler: String,
        reason: String,
    },
}

/// A place cloned from a consumer node whose home lives elsewhere.
#[derive(Debug, Clone)]
struct AwayPlace {
    flat_id: String,
    consumer: String,
    home: HomeRef,
}

#[derive(Debug, Clone, Default)]
pub struct Compiler {
    handlers: HandlerRegistry,
}

/// Flattens `tree` without external handlers.
pub fn flatten(tree: &IncludeHierarchy) -> Result<ExecutableNet, IncludeError> {
    Compiler::new().flatten(tree)
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handlers(handlers: HandlerRegistry) -> Self {
        Self { handlers }
    }

    pub fn flatten(&self, tree: &IncludeHierarchy) -> Result<ExecutableNet, IncludeError> {
        let name = tree
            .net(tree.root())
            .map(|net| net.name.clone())
            .unwrap_or_default();
        log::debug!("flattening `{name}` ({} nodes)", tree.len());

        let mut net = ExecutableNet::empty(name, self.handlers.clone());
        let mut aways = Vec::new();
        for (id, node) in tree.iter() {
            clone_node(&mut net, id, node, &mut aways)?;
        }
        for away in &aways {
            resolve_away(&mut net, tree, away)?;
        }
        compile_expressions(&mut net)?;
        self.attach_handlers(&mut net)?;

        net.fingerprint = Fingerprint::of(tree);
        let initial = net.initial_state();
        net.set_state(initial);
        net.reset_timing(0).map_err(IncludeError::Schedule)?;
        log::info!(
            "flattened `{}`: {} places, {} transitions, {} arcs, {} interface places merged",
            net.name(),
            net.places.len(),
            net.transitions.len(),
            net.arcs.len(),
            aways.len()
        );
        Ok(net)
    }

    fn attach_handlers(&self, net: &mut ExecutableNet) -> Result<(), IncludeError> {
        let mut handlers = HashMap::new();
        for transition in net.transitions.values() {
            let Some(name) = &transition.handler else {
                continue;
            };
            let handler = self
                .handlers
                .instantiate(name)
                .map_err(|reason| IncludeError::Handler {
                    transition: transition.id.clone(),
                    handler: name.clone(),
                    reason,
                })?;
            handlers.insert(transition.id.clone(), handler);
        }
        for handler in handlers.values_mut() {
            handler.set_executable_net(net);
        }
        net.handlers = handlers;
        Ok(())
    }
}

fn clone_node(
    net: &mut ExecutableNet,
    id: NodeId,
    node: &HierarchyNode,
    aways: &mut Vec<AwayPlace>,
) -> Result<(), IncludeError> {
    let prefix = node.prefix();
    let source = node.net();

    // 颜色不加前缀，同名颜色只保留第一次出现的定义
    for color in source.colors() {
        match net.colors.get(&color.id) {
            Some(existing) if existing != color => log::warn!(
                "color `{}` is defined differently in `{}`, keeping the first definition",
                color.id,
                node.qualified_name()
            ),
            Some(_) => {}
            None => {
                net.colors.insert(color.id.clone(), color.clone());
            }
        }
    }

    for annotation in source.annotations() {
        let flat = qualify(prefix, &annotation.id);
        let clone = Annotation {
            id: flat.clone(),
            ..annotation.clone()
        };
        insert_unique(&mut net.annotations, flat, clone, ComponentKind::Annotation)?;
    }

    for place in source.places() {
        let flat = qualify(prefix, &place.id);
        if net.transitions.contains_key(&flat) {
            return Err(duplicate(flat, ComponentKind::Place));
        }
        let mut clone = place.clone();
        clone.id = flat.clone();
        if let Some(home) = &place.status.home {
            if place.status.merge == MergeInterfaceState::InUse && home.node != id {
                clone.status.merge = MergeInterfaceState::Away;
                aways.push(AwayPlace {
                    flat_id: flat.clone(),
                    consumer: node.qualified_name().to_string(),
                    home: home.clone(),
                });
            }
        }
        insert_unique(&mut net.places, flat.clone(), clone, ComponentKind::Place)?;
        net.bindings.bind(SourcePlace::new(id, place.id.as_str()), flat);
    }

    for parameter in source.rate_parameters() {
        let flat = qualify(prefix, &parameter.id);
        let expression = rewrite(&flat, &parameter.expression, &mut prefixer(prefix), &mut prefixer(prefix))?;
        insert_unique(
            &mut net.rate_parameters,
            flat.clone(),
            RateParameter::new(flat, expression),
            ComponentKind::RateParameter,
        )?;
    }

    for transition in source.transitions() {
        let flat = qualify(prefix, &transition.id);
        if net.places.contains_key(&flat) {
            return Err(duplicate(flat, ComponentKind::Transition));
        }
        let mut clone = transition.clone();
        clone.id = flat.clone();
        clone.rate = match &transition.rate {
            Rate::Expression(text) => Rate::Expression(rewrite(&flat, text, &mut prefixer(prefix), &mut prefixer(prefix))?),
            Rate::Parameter(parameter) => Rate::Parameter(qualify(prefix, parameter)),
        };
        insert_unique(&mut net.transitions, flat, clone, ComponentKind::Transition)?;
    }

    for arc in source.inbound_arcs().chain(source.outbound_arcs()) {
        let flat = qualify(prefix, &arc.id);
        let mut clone = arc.clone();
        clone.id = flat.clone();
        clone.source = qualify(prefix, &arc.source);
        clone.target = qualify(prefix, &arc.target);
        for weight in clone.weights.values_mut() {
            *weight = rewrite(&flat, weight, &mut prefixer(prefix), &mut prefixer(prefix))?;
        }
        insert_unique(&mut net.arcs, flat, clone, ComponentKind::Arc)?;
    }
    Ok(())
}

/// Points every reference to an away place at its home and drops it.
fn resolve_away(net: &mut ExecutableNet, tree: &IncludeHierarchy, away: &AwayPlace) -> Result<(), IncludeError> {
    let missing = || IncludeError::MissingHome {
        away_id: away.flat_id.clone(),
        node: away.consumer.clone(),
    };
    let home_node = tree.node(away.home.node).ok_or_else(missing)?;
    let home = qualify(home_node.prefix(), &away.home.place);
    match net.places.get(&home) {
        Some(place) if place.status.merge == MergeInterfaceState::Home => {}
        _ => return Err(missing()),
    }

    let mut redirect = |id: &str| (id == away.flat_id).then(|| home.clone());
    let mut keep = |_: &str| None;
    for arc in net.arcs.values_mut() {
        if arc.place() == away.flat_id {
            *arc.place_mut() = home.clone();
        }
        let id = arc.id.clone();
        for weight in arc.weights.values_mut() {
            *weight = rewrite(&id, weight, &mut redirect, &mut keep)?;
        }
    }
    for parameter in net.rate_parameters.values_mut() {
        parameter.expression = rewrite(&parameter.id, &parameter.expression, &mut redirect, &mut keep)?;
    }
    for transition in net.transitions.values_mut() {
        if let Rate::Expression(text) = &mut transition.rate {
            *text = rewrite(&transition.id, text, &mut redirect, &mut keep)?;
        }
    }

    if let Some(place) = net.places.shift_remove(&away.flat_id) {
        if place.tokens.values().any(|count| !count.is_zero()) {
            log::debug!("tokens of away place `{}` are dropped in favour of `{home}`", away.flat_id);
        }
    }
    net.bindings.redirect(&away.flat_id, &home);
    log::debug!("interface place `{}` merged into `{home}`", away.flat_id);
    Ok(())
}

/// Parses every expression once and checks what it references.
fn compile_expressions(net: &mut ExecutableNet) -> Result<(), IncludeError> {
    let mut parameters = HashMap::new();
    for parameter in net.rate_parameters.values() {
        let expr = parse(&parameter.id, &parameter.expression)?;
        check_references(net, &parameter.id, &expr)?;
        parameters.insert(parameter.id.clone(), expr);
    }
    check_parameter_cycles(&parameters)?;

    let mut rates = HashMap::new();
    for transition in net.transitions.values() {
        let expr = match &transition.rate {
            Rate::Expression(text) => parse(&transition.id, text)?,
            Rate::Parameter(parameter) => Expr::Parameter(parameter.clone()),
        };
        check_references(net, &transition.id, &expr)?;
        rates.insert(transition.id.clone(), expr);
    }

    let mut weights = HashMap::new();
    for arc in net.arcs.values() {
        for endpoint in [arc.place(), arc.transition()] {
            if !net.places.contains_key(endpoint) && !net.transitions.contains_key(endpoint) {
                return Err(IncludeError::DanglingArc {
                    arc: arc.id.clone(),
                    endpoint: endpoint.to_string(),
                });
            }
        }
        let mut compiled = Vec::with_capacity(arc.weights.len());
        for (color, text) in &arc.weights {
            if !net.colors.contains_key(color) {
                return Err(IncludeError::UnknownColor {
                    component: arc.id.clone(),
                    color: color.clone(),
                });
            }
            let expr = parse(&arc.id, text)?;
            check_references(net, &arc.id, &expr)?;
            compiled.push((color.clone(), expr));
        }
        weights.insert(arc.id.clone(), compiled);
    }

    net.parameters = parameters;
    net.rates = rates;
    net.weights = weights;
    Ok(())
}

fn check_references(net: &ExecutableNet, component: &str, expr: &Expr) -> Result<(), IncludeError> {
    if let Some(place) = expr.places().into_iter().find(|p| !net.places.contains_key(*p)) {
        return Err(IncludeError::UnknownPlace {
            component: component.to_string(),
            place: place.to_string(),
        });
    }
    if let Some(color) = expr.colors().into_iter().find(|c| !net.colors.contains_key(*c)) {
        return Err(IncludeError::UnknownColor {
            component: component.to_string(),
            color: color.to_string(),
        });
    }
    if let Some(parameter) = expr
        .parameters()
        .into_iter()
        .find(|p| !net.rate_parameters.contains_key(*p))
    {
        return Err(IncludeError::UnknownParameter {
            component: component.to_string(),
            parameter: parameter.to_string(),
        });
    }
    Ok(())
}

fn check_parameter_cycles(parameters: &HashMap<String, Expr>) -> Result<(), IncludeError> {
    fn visit<'a>(
        id: &'a str,
        parameters: &'a HashMap<String, Expr>,
        active: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), IncludeError> {
        if done.contains(id) {
            return Ok(());
        }
        if !active.insert(id) {
            return Err(IncludeError::ParameterCycle(id.to_string()));
        }
        if let Some(expr) = parameters.get(id) {
            for next in expr.parameters() {
                visit(next, parameters, active, done)?;
            }
        }
        active.remove(id);
        done.insert(id);
        Ok(())
    }

    let mut done = HashSet::new();
    let mut ids: Vec<&String> = parameters.keys().collect();
    ids.sort();
    for id in ids {
        visit(id, parameters, &mut HashSet::new(), &mut done)?;
    }
    Ok(())
}

fn parse(component: &str, text: &str) -> Result<Expr, IncludeError> {
    Expr::parse(text).map_err(|source| IncludeError::InvalidExpression {
        component: component.to_string(),
        source,
    })
}

/// Re-renders `text` with place and parameter ids rewritten.
fn rewrite(
    component: &str,
    text: &str,
    places: &mut impl FnMut(&str) -> Option<String>,
    parameters: &mut impl FnMut(&str) -> Option<String>,
) -> Result<String, IncludeError> {
    let mut expr = parse(component, text)?;
    if expr.places().is_empty() && expr.parameters().is_empty() {
        return Ok(text.to_string());
    }
    expr.rewrite_places(places);
    expr.rewrite_parameters(parameters);
    Ok(expr.to_string())
}

fn prefixer(prefix: &str) -> impl FnMut(&str) -> Option<String> + '_ {
    move |local| Some(qualify(prefix, local))
}

fn insert_unique<T>(map: &mut IndexMap<String, T>, id: String, value: T, kind: ComponentKind) -> Result<(), IncludeError> {
    if map.contains_key(&id) {
        return Err(duplicate(id, kind));
    }
    map.insert(id, value);
    Ok(())
}

fn duplicate(id: String, kind: ComponentKind) -> IncludeError {
    IncludeError::DuplicateId { id, kind }
}
