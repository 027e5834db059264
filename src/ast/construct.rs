//! Node construction helpers.
//!
//! Every helper returns a detached node with its children already attached in
//! the fixed layout of its kind.

use super::{LoopControl, NodeId, NodeKind, Number, Operator, SyntaxTree};
use crate::context::{ContextId, FunctionId, TypeId, VariableId};
use crate::core::config::Format;

impl SyntaxTree {
    pub fn number(&mut self, value: i64) -> NodeId {
        self.create(NodeKind::Number {
            value: Number::Integer(value),
            format: Format::I64,
        })
    }

    pub fn number_with_format(&mut self, value: i64, format: Format) -> NodeId {
        self.create(NodeKind::Number {
            value: Number::Integer(value),
            format,
        })
    }

    pub fn decimal(&mut self, value: f64) -> NodeId {
        self.create(NodeKind::Number {
            value: Number::Decimal(value),
            format: Format::Decimal,
        })
    }

    pub fn variable(&mut self, variable: VariableId) -> NodeId {
        self.create(NodeKind::Variable(variable))
    }

    pub fn operator(&mut self, operator: Operator, left: NodeId, right: NodeId) -> NodeId {
        let node = self.create(NodeKind::Operator(operator));
        self.add_children(node, &[left, right]);
        node
    }

    pub fn assign(&mut self, destination: NodeId, value: NodeId) -> NodeId {
        self.operator(Operator::Assign, destination, value)
    }

    pub fn parenthesis(&mut self, content: &[NodeId]) -> NodeId {
        let node = self.create(NodeKind::Parenthesis);
        self.add_children(node, content);
        node
    }

    pub fn call(&mut self, function: FunctionId, arguments: &[NodeId]) -> NodeId {
        let node = self.create(NodeKind::Call(function));
        self.add_children(node, arguments);
        node
    }

    /// Member access `object.member`.
    pub fn link(&mut self, object: NodeId, member: VariableId) -> NodeId {
        let node = self.create(NodeKind::Link);
        let member = self.variable(member);
        self.add_children(node, &[object, member]);
        node
    }

    /// Indexed access `object[index]`.
    pub fn offset(&mut self, object: NodeId, index: NodeId) -> NodeId {
        let node = self.create(NodeKind::Offset);
        self.add_children(node, &[object, index]);
        node
    }

    pub fn scope(&mut self, context: ContextId, statements: &[NodeId]) -> NodeId {
        let node = self.create(NodeKind::Scope(context));
        self.add_children(node, statements);
        node
    }

    /// `if condition { body }`; the condition scope shares the body's context.
    pub fn if_statement(&mut self, context: ContextId, condition: NodeId, body: &[NodeId]) -> NodeId {
        self.if_statement_with_initialization(context, &[], condition, body)
    }

    pub fn if_statement_with_initialization(
        &mut self,
        context: ContextId,
        initialization: &[NodeId],
        condition: NodeId,
        body: &[NodeId],
    ) -> NodeId {
        let node = self.create(NodeKind::If(context));
        self.attach_conditional(node, context, initialization, condition, body);
        node
    }

    pub fn else_if(&mut self, context: ContextId, condition: NodeId, body: &[NodeId]) -> NodeId {
        let node = self.create(NodeKind::ElseIf(context));
        self.attach_conditional(node, context, &[], condition, body);
        node
    }

    fn attach_conditional(
        &mut self,
        node: NodeId,
        context: ContextId,
        initialization: &[NodeId],
        condition: NodeId,
        body: &[NodeId],
    ) {
        let condition_scope = self.scope(context, initialization);
        self.add_child(condition_scope, condition);
        let body = self.scope(context, body);
        self.add_children(node, &[condition_scope, body]);
    }

    pub fn else_statement(&mut self, context: ContextId, body: &[NodeId]) -> NodeId {
        let node = self.create(NodeKind::Else(context));
        let body = self.scope(context, body);
        self.add_child(node, body);
        node
    }

    /// Pre-tested loop: `loop (initialization, condition, action) { body }`.
    pub fn loop_statement(
        &mut self,
        context: ContextId,
        initialization: &[NodeId],
        condition: NodeId,
        action: &[NodeId],
        body: &[NodeId],
    ) -> NodeId {
        let node = self.create(NodeKind::Loop {
            context,
            forever: false,
        });
        let initialization = self.scope(context, initialization);
        let condition_scope = self.scope(context, &[condition]);
        let action = self.scope(context, action);
        let body = self.scope(context, body);
        self.add_children(node, &[initialization, condition_scope, action, body]);
        node
    }

    pub fn forever_loop(&mut self, context: ContextId, body: &[NodeId]) -> NodeId {
        let node = self.create(NodeKind::Loop {
            context,
            forever: true,
        });
        let body = self.scope(context, body);
        self.add_child(node, body);
        node
    }

    pub fn loop_control(&mut self, control: LoopControl) -> NodeId {
        self.create(NodeKind::LoopControl(control))
    }

    pub fn return_statement(&mut self, value: Option<NodeId>) -> NodeId {
        let node = self.create(NodeKind::Return);
        if let Some(value) = value {
            self.add_child(node, value);
        }
        node
    }

    pub fn stack_address(&mut self, identity: &str, bytes: u32, type_id: TypeId) -> NodeId {
        self.create(NodeKind::StackAddress {
            identity: identity.to_string(),
            bytes,
            type_id,
        })
    }

    pub fn compiles(&mut self, expressions: &[NodeId]) -> NodeId {
        let node = self.create(NodeKind::Compiles);
        self.add_children(node, expressions);
        node
    }

    pub fn unresolved_identifier(&mut self, name: &str) -> NodeId {
        self.create(NodeKind::UnresolvedIdentifier(name.to_string()))
    }

    pub fn unresolved_function(&mut self, name: &str, arguments: &[NodeId]) -> NodeId {
        let node = self.create(NodeKind::UnresolvedFunction(name.to_string()));
        self.add_children(node, arguments);
        node
    }
}
