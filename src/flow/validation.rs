use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::flow::nodes::{
    Action, ActionNode, ActionType, AnswerType, ConditionNode, ConditionOperator, NodeKind,
    NodeType, QuestionNode, MAX_CHOICES,
};
use crate::flow::types::{FlowGraph, VariableType};
use crate::flow::value::FlowValue;
use crate::utils::validation::ConfigValidator;

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// 单条校验结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
}

/// 完整的校验报告；没有 error 级诊断的图才可以发布
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.diagnostics
            .iter()
            .all(|d| d.level != DiagnosticLevel::Error)
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
            .collect()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }

    pub fn for_node(&self, node_id: &str) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.node_id.as_deref() == Some(node_id))
            .collect()
    }
}

#[derive(Default)]
struct Collector {
    diagnostics: Vec<Diagnostic>,
}

impl Collector {
    fn push(
        &mut self,
        level: DiagnosticLevel,
        code: &str,
        message: String,
        node_id: Option<&str>,
        edge_id: Option<&str>,
        field_path: Option<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            level,
            code: code.to_string(),
            message,
            node_id: node_id.map(str::to_string),
            edge_id: edge_id.map(str::to_string),
            field_path,
        });
    }

    fn node_error(&mut self, code: &str, node_id: &str, message: String) {
        self.push(DiagnosticLevel::Error, code, message, Some(node_id), None, None);
    }

    fn node_field_error(&mut self, code: &str, node_id: &str, field_path: String, message: String) {
        self.push(
            DiagnosticLevel::Error,
            code,
            message,
            Some(node_id),
            None,
            Some(field_path),
        );
    }

    fn node_warning(&mut self, code: &str, node_id: &str, message: String) {
        self.push(DiagnosticLevel::Warning, code, message, Some(node_id), None, None);
    }

    fn edge_error(&mut self, code: &str, edge_id: &str, message: String) {
        self.push(DiagnosticLevel::Error, code, message, None, Some(edge_id), None);
    }

    fn graph_error(&mut self, code: &str, field_path: &str, message: String) {
        self.push(
            DiagnosticLevel::Error,
            code,
            message,
            None,
            None,
            Some(field_path.to_string()),
        );
    }
}

/// 发布前的结构与语义校验，收集全部问题而不是遇错即停
pub struct GraphValidator;

impl GraphValidator {
    pub fn validate(graph: &FlowGraph) -> ValidationReport {
        let mut out = Collector::default();

        check_identity(graph, &mut out);
        check_start_and_end(graph, &mut out);
        check_variables(graph, &mut out);
        for node in &graph.nodes {
            match &node.kind {
                NodeKind::Question(question) => check_question(graph, &node.id, question, &mut out),
                NodeKind::Condition(condition) => {
                    check_condition(graph, &node.id, condition, &mut out)
                }
                NodeKind::Action(action) => check_action(graph, &node.id, action, &mut out),
                NodeKind::Start | NodeKind::End => {}
            }
        }
        check_outgoing(graph, &mut out);
        check_reachability(graph, &mut out);

        ValidationReport {
            diagnostics: out.diagnostics,
        }
    }
}

fn check_identity(graph: &FlowGraph, out: &mut Collector) {
    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if let Err(error) = ConfigValidator::validate_node_id(&node.id) {
            out.node_error("E005", &node.id, error.to_string());
        }
        if !seen.insert(node.id.as_str()) {
            out.node_error("E001", &node.id, format!("duplicate node id `{}`", node.id));
        }
    }

    let mut edge_ids = HashSet::new();
    for edge in &graph.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            out.edge_error("E002", &edge.id, format!("duplicate edge id `{}`", edge.id));
        }
        if !graph.contains_node(&edge.source) {
            out.edge_error(
                "E003",
                &edge.id,
                format!("edge source `{}` does not exist", edge.source),
            );
        }
        if !graph.contains_node(&edge.target) {
            out.edge_error(
                "E004",
                &edge.id,
                format!("edge target `{}` does not exist", edge.target),
            );
        }
    }
}

fn check_start_and_end(graph: &FlowGraph, out: &mut Collector) {
    let config = &graph.configuration;
    let starts: Vec<_> = graph.nodes_of_type(NodeType::Start).collect();
    match starts.as_slice() {
        [] => out.graph_error("E010", "nodes", "graph has no start node".to_string()),
        [start] => {
            if start.id != config.start_node_id {
                out.graph_error(
                    "E012",
                    "flowConfiguration.startNodeId",
                    format!(
                        "startNodeId `{}` does not match start node `{}`",
                        config.start_node_id, start.id
                    ),
                );
            }
            if graph.incoming(&start.id).next().is_some() {
                out.node_warning("W102", &start.id, "start node has incoming edges".to_string());
            }
        }
        many => {
            for start in many {
                out.node_error(
                    "E011",
                    &start.id,
                    format!("graph has {} start nodes, expected exactly one", many.len()),
                );
            }
        }
    }

    let declared: HashSet<&str> = config.end_node_ids.iter().map(String::as_str).collect();
    for end in graph.nodes_of_type(NodeType::End) {
        if !declared.contains(end.id.as_str()) {
            out.node_error(
                "E020",
                &end.id,
                format!("end node `{}` is missing from endNodeIds", end.id),
            );
        }
        if graph.outgoing(&end.id).next().is_some() {
            out.node_warning("W101", &end.id, "end node has outgoing edges".to_string());
        }
    }
    for (position, id) in config.end_node_ids.iter().enumerate() {
        let is_end = graph
            .node(id)
            .is_some_and(|node| node.node_type() == NodeType::End);
        if !is_end {
            out.graph_error(
                "E021",
                &format!("flowConfiguration.endNodeIds[{position}]"),
                format!("endNodeIds entry `{id}` is not an end node"),
            );
        }
    }
}

fn check_variables(graph: &FlowGraph, out: &mut Collector) {
    let mut seen = HashSet::new();
    for (position, variable) in graph.variables().iter().enumerate() {
        let path = format!("flowConfiguration.variables[{position}].name");
        if let Err(error) = ConfigValidator::validate_identifier(&variable.name) {
            out.graph_error("E051", &path, error.to_string());
        }
        if !seen.insert(variable.name.as_str()) {
            out.graph_error("E050", &path, format!("duplicate variable `{}`", variable.name));
        }
    }
}

fn check_question(graph: &FlowGraph, node_id: &str, question: &QuestionNode, out: &mut Collector) {
    match graph.variable(&question.field) {
        None => out.node_field_error(
            "E052",
            node_id,
            "data.field".to_string(),
            format!("field `{}` is not a declared variable", question.field),
        ),
        Some(variable) => {
            let compatible = match variable.variable_type {
                VariableType::Any => true,
                VariableType::Number => question.expected_answer_type == AnswerType::Number,
                VariableType::Boolean => question.expected_answer_type == AnswerType::Boolean,
                VariableType::Text => !matches!(
                    question.expected_answer_type,
                    AnswerType::Number | AnswerType::Boolean
                ),
                VariableType::List | VariableType::Map => false,
            };
            if !compatible {
                out.node_field_error(
                    "E064",
                    node_id,
                    "data.expectedAnswerType".to_string(),
                    format!(
                        "answer type `{}` cannot be stored in variable `{}` of type {:?}",
                        question.expected_answer_type.as_str(),
                        variable.name,
                        variable.variable_type
                    ),
                );
            }
        }
    }

    let is_choice = question.expected_answer_type == AnswerType::Choice;
    if is_choice && question.choices.is_empty() {
        out.node_field_error(
            "E060",
            node_id,
            "data.choices".to_string(),
            "choice question has no choices".to_string(),
        );
    }
    if !is_choice && !question.choices.is_empty() {
        out.node_field_error(
            "E062",
            node_id,
            "data.choices".to_string(),
            "choices are only allowed on choice questions".to_string(),
        );
    }
    if question.choices.len() > MAX_CHOICES {
        out.node_field_error(
            "E061",
            node_id,
            "data.choices".to_string(),
            format!(
                "{} choices exceed the limit of {MAX_CHOICES}",
                question.choices.len()
            ),
        );
    }
    let mut seen = HashSet::new();
    for choice in &question.choices {
        if !seen.insert(choice.as_str()) {
            out.node_field_error(
                "E063",
                node_id,
                "data.choices".to_string(),
                format!("duplicate choice `{choice}`"),
            );
        }
    }
}

fn check_condition(
    graph: &FlowGraph,
    node_id: &str,
    condition_node: &ConditionNode,
    out: &mut Collector,
) {
    let mut branch_keys = HashSet::new();
    for (index, condition) in condition_node.conditions.iter().enumerate() {
        if condition.operator != ConditionOperator::Complete
            && graph.variable(&condition.field).is_none()
        {
            out.node_field_error(
                "E052",
                node_id,
                format!("data.conditions[{index}].field"),
                format!("field `{}` is not a declared variable", condition.field),
            );
        }

        let key = condition_node.branch_key(index).unwrap_or_default();
        if !branch_keys.insert(key.clone()) {
            out.node_field_error(
                "E073",
                node_id,
                format!("data.conditions[{index}].label"),
                format!("branch key `{key}` is used by more than one condition"),
            );
        }
        if !graph
            .outgoing(node_id)
            .any(|edge| edge.label.as_deref() == Some(key.as_str()))
        {
            out.node_field_error(
                "E070",
                node_id,
                format!("data.conditions[{index}]"),
                format!("no outgoing edge labeled `{key}` for condition {index}"),
            );
        }
    }

    let defaults: Vec<_> = graph.outgoing(node_id).filter(|edge| edge.is_default()).collect();
    if defaults.len() > 1 {
        for edge in &defaults {
            out.edge_error(
                "E071",
                &edge.id,
                format!("condition node `{node_id}` has more than one default edge"),
            );
        }
    }
    if defaults.is_empty() {
        out.node_warning(
            "W103",
            node_id,
            "condition node has no default edge; unmatched input fails the session".to_string(),
        );
    }
    if condition_node.conditions.is_empty() {
        out.node_warning("W106", node_id, "condition node has no conditions".to_string());
    }

    for edge in graph.outgoing(node_id) {
        let matches_branch = match edge.label.as_deref() {
            Some(label) => edge.is_default() || branch_keys.contains(label),
            None => false,
        };
        if !matches_branch {
            out.edge_error(
                "E072",
                &edge.id,
                format!(
                    "edge from condition node `{node_id}` has label {:?} which matches no branch",
                    edge.label
                ),
            );
        }
    }
}

fn check_action(graph: &FlowGraph, node_id: &str, action_node: &ActionNode, out: &mut Collector) {
    if action_node.actions.is_empty() {
        out.node_warning("W105", node_id, "action node has no actions".to_string());
    }

    let mut redirected = false;
    for (index, action) in action_node.actions.iter().enumerate() {
        let path = format!("data.actions[{index}]");
        if redirected {
            out.node_warning(
                "W104",
                node_id,
                format!("{path} follows a redirect and never runs"),
            );
        }
        check_action_parameters(graph, node_id, &path, action, out);
        if action.action_type == ActionType::Redirect {
            redirected = true;
        }
    }
}

fn check_action_parameters(
    graph: &FlowGraph,
    node_id: &str,
    path: &str,
    action: &Action,
    out: &mut Collector,
) {
    let require = |key: &str, out: &mut Collector| -> Option<String> {
        match action.param_str(key) {
            Some(value) if !value.trim().is_empty() => Some(value.to_string()),
            _ => {
                out.node_field_error(
                    "E081",
                    node_id,
                    format!("{path}.parameters.{key}"),
                    format!("`{}` action requires a `{key}` parameter", action.action_type),
                );
                None
            }
        }
    };

    match &action.action_type {
        ActionType::SendMessage => {
            require("message", out);
        }
        ActionType::GenerateResponse => {
            require("prompt", out);
            let temperature = action
                .parameters
                .get("config")
                .and_then(FlowValue::as_map)
                .and_then(|config| config.get("temperature"))
                .and_then(FlowValue::as_f64);
            if let Some(temperature) = temperature {
                if let Err(error) = ConfigValidator::validate_temperature(temperature) {
                    out.node_field_error(
                        "E085",
                        node_id,
                        format!("{path}.parameters.config.temperature"),
                        error.to_string(),
                    );
                }
            }
        }
        ActionType::StoreData => {
            if action.parameters.is_empty() {
                out.node_field_error(
                    "E081",
                    node_id,
                    format!("{path}.parameters"),
                    "`store_data` action has nothing to store".to_string(),
                );
            }
        }
        ActionType::ApiCall => {
            if let Some(url) = require("url", out) {
                if let Err(error) = ConfigValidator::validate_url(&url) {
                    out.node_field_error(
                        "E082",
                        node_id,
                        format!("{path}.parameters.url"),
                        error.to_string(),
                    );
                }
            }
            if let Some(method) = action.param_str("method") {
                if let Err(error) = ConfigValidator::validate_http_method(method) {
                    out.node_field_error(
                        "E083",
                        node_id,
                        format!("{path}.parameters.method"),
                        error.to_string(),
                    );
                }
            }
        }
        ActionType::Redirect => {
            if let Some(target) = require("target", out) {
                if !graph.contains_node(&target) {
                    out.node_field_error(
                        "E084",
                        node_id,
                        format!("{path}.parameters.target"),
                        format!("redirect target `{target}` does not exist"),
                    );
                }
            }
        }
        ActionType::Unknown(name) => {
            out.node_field_error(
                "E080",
                node_id,
                format!("{path}.type"),
                format!("unknown action type `{name}`"),
            );
        }
    }
}

fn check_outgoing(graph: &FlowGraph, out: &mut Collector) {
    for node in &graph.nodes {
        let count = graph.outgoing(&node.id).count();
        match node.node_type() {
            NodeType::End => {}
            NodeType::Condition => {
                if count == 0 {
                    out.node_error("E030", &node.id, "node has no outgoing edge".to_string());
                }
            }
            NodeType::Start | NodeType::Question | NodeType::Action => {
                if count == 0 {
                    out.node_error("E030", &node.id, "node has no outgoing edge".to_string());
                } else if count > 1 {
                    out.node_error(
                        "E031",
                        &node.id,
                        format!(
                            "{} node must have exactly one outgoing edge, found {count}",
                            node.node_type()
                        ),
                    );
                }
            }
        }
    }
}

/// 后继表：边 + 重定向目标
fn successors(graph: &FlowGraph) -> HashMap<&str, Vec<&str>> {
    let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        if graph.contains_node(&edge.target) {
            map.entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
    }
    for node in &graph.nodes {
        if let NodeKind::Action(action_node) = &node.kind {
            for action in &action_node.actions {
                if action.action_type != ActionType::Redirect {
                    continue;
                }
                if let Some(target) = action.param_str("target") {
                    if let Some(target_node) = graph.node(target) {
                        map.entry(node.id.as_str())
                            .or_default()
                            .push(target_node.id.as_str());
                    }
                }
            }
        }
    }
    map
}

fn reachable_from<'a>(roots: Vec<&'a str>, next: &HashMap<&'a str, Vec<&'a str>>) -> HashSet<&'a str> {
    let mut seen: HashSet<&str> = roots.iter().copied().collect();
    let mut queue: VecDeque<&str> = roots.into_iter().collect();
    while let Some(node) = queue.pop_front() {
        for &target in next.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            if seen.insert(target) {
                queue.push_back(target);
            }
        }
    }
    seen
}

fn check_reachability(graph: &FlowGraph, out: &mut Collector) {
    let start = &graph.configuration.start_node_id;
    if !graph.contains_node(start) {
        out.graph_error(
            "E013",
            "flowConfiguration.startNodeId",
            format!("startNodeId `{start}` does not exist"),
        );
        return;
    }

    let forward = successors(graph);
    let reachable = reachable_from(vec![start.as_str()], &forward);

    let mut reported = HashSet::new();
    for node in &graph.nodes {
        if reachable.contains(node.id.as_str()) || !reported.insert(node.id.as_str()) {
            continue;
        }
        if node.node_type() == NodeType::End {
            out.node_error(
                "E041",
                &node.id,
                format!("end node `{}` is unreachable from start", node.id),
            );
        } else {
            out.node_error(
                "E040",
                &node.id,
                format!("node `{}` is unreachable from start", node.id),
            );
        }
    }

    let mut backward: HashMap<&str, Vec<&str>> = HashMap::new();
    for (source, targets) in &forward {
        for target in targets {
            backward.entry(*target).or_default().push(*source);
        }
    }
    let ends: Vec<&str> = graph
        .nodes_of_type(NodeType::End)
        .map(|node| node.id.as_str())
        .collect();
    if ends.is_empty() {
        out.graph_error("E022", "nodes", "graph has no end node".to_string());
        return;
    }
    let terminating = reachable_from(ends, &backward);
    for node in &graph.nodes {
        if reachable.contains(node.id.as_str()) && !terminating.contains(node.id.as_str()) {
            out.node_error(
                "E042",
                &node.id,
                format!("node `{}` cannot reach any end node", node.id),
            );
        }
    }
}
