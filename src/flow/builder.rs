use crate::flow::nodes::{
    Action, ActionNode, AnswerType, Condition, ConditionNode, Node, NodeKind, QuestionNode,
};
use crate::flow::types::{Edge, FlowConfiguration, FlowGraph, FlowVariable, VariableType};

/// Flow 构建器
pub struct FlowBuilder {
    id: String,
    version: u32,
    start: Option<String>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    end_node_ids: Vec<String>,
    variables: Vec<FlowVariable>,
}

impl FlowBuilder {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self {
            id: id.into(),
            version: 1,
            start: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            end_node_ids: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn version(&mut self, version: u32) -> &mut Self {
        self.version = version;
        self
    }

    pub fn declare_variable(&mut self, name: &str, variable_type: VariableType) -> &mut Self {
        self.variables.push(FlowVariable::new(name, variable_type));
        self
    }

    pub fn add_variable(&mut self, variable: FlowVariable) -> &mut Self {
        self.variables.push(variable);
        self
    }

    pub fn add_node(&mut self, id: &str, kind: NodeKind) -> &mut Self {
        self.nodes.push(Node::new(id, kind));
        self
    }

    /// 添加开始节点，并将其设为流程入口
    pub fn add_start(&mut self, id: &str) -> &mut Self {
        self.start = Some(id.to_string());
        self.add_node(id, NodeKind::Start)
    }

    pub fn add_question(&mut self, id: &str, field: &str, answer_type: AnswerType) -> &mut Self {
        self.add_question_node(
            id,
            QuestionNode {
                field: field.to_string(),
                expected_answer_type: answer_type,
                choices: Vec::new(),
                prompt: None,
            },
        )
    }

    pub fn add_choice_question(&mut self, id: &str, field: &str, choices: Vec<String>) -> &mut Self {
        self.add_question_node(
            id,
            QuestionNode {
                field: field.to_string(),
                expected_answer_type: AnswerType::Choice,
                choices,
                prompt: None,
            },
        )
    }

    pub fn add_question_node(&mut self, id: &str, question: QuestionNode) -> &mut Self {
        self.add_node(id, NodeKind::Question(question))
    }

    pub fn add_condition(&mut self, id: &str, conditions: Vec<Condition>) -> &mut Self {
        self.add_node(id, NodeKind::Condition(ConditionNode { conditions }))
    }

    pub fn add_action(&mut self, id: &str, actions: Vec<Action>) -> &mut Self {
        self.add_node(id, NodeKind::Action(ActionNode { actions }))
    }

    /// 添加结束节点，并登记到 endNodeIds
    pub fn add_end(&mut self, id: &str) -> &mut Self {
        self.end_node_ids.push(id.to_string());
        self.add_node(id, NodeKind::End)
    }

    pub fn set_start(&mut self, id: &str) -> &mut Self {
        self.start = Some(id.to_string());
        self
    }

    pub fn connect(&mut self, from: &str, to: &str) -> &mut Self {
        let edge = Edge::new(self.next_edge_id(), from, to);
        self.edges.push(edge);
        self
    }

    pub fn connect_labeled(&mut self, from: &str, to: &str, label: &str) -> &mut Self {
        let edge = Edge::new(self.next_edge_id(), from, to).with_label(label);
        self.edges.push(edge);
        self
    }

    fn next_edge_id(&self) -> String {
        format!("e{}", self.edges.len() + 1)
    }

    pub fn build(&self) -> FlowGraph {
        FlowGraph::new(
            self.id.clone(),
            self.version,
            self.nodes.clone(),
            self.edges.clone(),
            FlowConfiguration {
                start_node_id: self.start.clone().unwrap_or_default(),
                end_node_ids: self.end_node_ids.clone(),
                variables: self.variables.clone(),
            },
        )
    }
}
