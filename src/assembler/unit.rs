// This module implements the Unit, the per-function compilation context. A Unit is driven in
// two passes over the same instruction list. During the append pass the builders walk the
// syntax tree and push abstract instructions; every appended instruction creates its result,
// marks its parameters as used at its index (which is how lifetimes are measured) and may
// simulate the handle its result will have. During the build pass the instructions are
// visited in order, expired registers are released before each one, and each instruction
// chooses concrete machine operations against the register file. The Unit also owns the
// variable bindings and the scope stack of the append pass, the loop registry used by
// break/continue, the label and identity counters, the constant data table and the build
// snapshots taken by SaveState, EnterScope and SymmetryStart.

//! Per-function compilation context.

use crate::assembler::handle::Handle;
use crate::assembler::instruction::{Instruction, InstructionKind, Label};
use crate::assembler::operand::MachineOp;
use crate::assembler::result::{JoinSettings, ResultArena, ResultId};
use crate::assembler::target::Target;
use crate::ast::{NodeId, Number, SyntaxTree};
use crate::context::{ContextTree, FunctionId, VariableCategory, VariableId};
use crate::core::config::{BackendConfig, Format, Size};
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{Occupancy, RegisterFile};
use hashbrown::HashMap;
use log::{debug, trace};

/// A lexical region of the append pass.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Variables active at entry with their bindings.
    pub actives: Vec<(VariableId, ResultId)>,
    /// Whether leaving the scope appends a MergeScope.
    pub merge: bool,
    /// Index of the EnterScope instruction of a merging scope.
    pub enter: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LoopRecord {
    pub start: Label,
    pub exit: Label,
    /// Index of the SymmetryStart instruction and the actives it recorded.
    pub symmetry: Option<(usize, Vec<(VariableId, ResultId)>)>,
}

/// Append-pass state: what every variable is bound to.
#[derive(Debug, Clone)]
pub struct UnitState {
    pub bindings: HashMap<VariableId, ResultId>,
    pub scope_depth: usize,
    pub position: usize,
}

/// Build-pass state: register ownership and every handle.
#[derive(Debug, Clone)]
pub struct BuildState {
    pub occupancy: Occupancy,
    pub handles: Vec<Handle>,
}

/// Entry of the constant data section.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantEntry {
    pub identifier: String,
    pub value: Number,
    pub size: Size,
}

/// Location of an active variable recorded when a region was entered.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub variable: VariableId,
    pub result: ResultId,
    pub handle: Handle,
}

pub struct Unit<'a> {
    pub(crate) tree: &'a mut SyntaxTree,
    pub(crate) contexts: &'a ContextTree,
    pub(crate) config: BackendConfig,
    pub(crate) target: Target,
    pub(crate) function: FunctionId,
    pub(crate) symbol: String,

    pub(crate) instructions: Vec<Instruction>,
    pub(crate) results: ResultArena,
    /// Index of the next appended instruction, or of the instruction being built.
    pub(crate) position: usize,
    pub(crate) registers: RegisterFile,

    pub(crate) bindings: HashMap<VariableId, ResultId>,
    pub(crate) scopes: Vec<Scope>,
    pub(crate) loops: HashMap<NodeId, LoopRecord>,

    labels: u32,
    identities: u32,
    temporaries: u32,

    pub(crate) states: HashMap<usize, BuildState>,
    pub(crate) entries: HashMap<usize, Vec<Entry>>,
    pub(crate) constants: Vec<ConstantEntry>,
    /// Machine operations of the instruction being built.
    pub(crate) operations: Vec<MachineOp>,
    pub(crate) spills: usize,
    built: bool,
}

impl<'a> Unit<'a> {
    pub fn new(
        tree: &'a mut SyntaxTree,
        contexts: &'a ContextTree,
        function: FunctionId,
        config: BackendConfig,
    ) -> Self {
        let target = Target::new(config.architecture);
        let registers = target.register_file();
        let symbol = contexts.function_fullname(function);

        Self {
            tree,
            contexts,
            config,
            target,
            function,
            symbol,
            instructions: Vec::new(),
            results: ResultArena::new(),
            position: 0,
            registers,
            bindings: HashMap::new(),
            scopes: Vec::new(),
            loops: HashMap::new(),
            labels: 0,
            identities: 0,
            temporaries: 0,
            states: HashMap::new(),
            entries: HashMap::new(),
            constants: Vec::new(),
            operations: Vec::new(),
            spills: 0,
            built: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> BackendConfig {
        self.config
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn tree(&self) -> &SyntaxTree {
        self.tree
    }

    pub fn contexts(&self) -> &ContextTree {
        self.contexts
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn results(&self) -> &ResultArena {
        &self.results
    }

    pub fn constants(&self) -> &[ConstantEntry] {
        &self.constants
    }

    pub fn spills(&self) -> usize {
        self.spills
    }

    pub fn create_label(&mut self) -> Label {
        let label = Label(self.labels);
        self.labels += 1;
        label
    }

    /// Symbol-qualified name of a label.
    pub fn label_name(&self, label: Label) -> String {
        format!("{}_{}", self.symbol, label)
    }

    pub fn create_identity(&mut self) -> String {
        let identity = format!("{}_S{}", self.symbol, self.identities);
        self.identities += 1;
        identity
    }

    pub(crate) fn create_temporary(&mut self) -> u32 {
        let identity = self.temporaries;
        self.temporaries += 1;
        identity
    }

    pub fn create_result(&mut self, handle: Handle, format: Format) -> ResultId {
        self.results.create(handle, format)
    }

    pub fn create_constant(&mut self, value: Number, format: Format) -> ResultId {
        self.results.create(Handle::Constant(value), format)
    }

    /// Append an instruction and return its result.
    pub fn append(&mut self, kind: InstructionKind, format: Format) -> ResultId {
        let position = self.instructions.len();
        let handle = match &kind {
            InstructionKind::AllocateStack { identity, bytes } => Handle::Inline {
                identity: identity.clone(),
                bytes: *bytes,
            },
            InstructionKind::GetMemoryAddress {
                start,
                offset,
                stride,
            } => Handle::ComplexMemory {
                start: *start,
                offset: *offset,
                stride: *stride,
            },
            InstructionKind::GetObjectPointer { start, offset } => Handle::Memory {
                start: *start,
                offset: *offset,
            },
            _ => Handle::None,
        };

        let result = self.results.create(handle, format);
        if matches!(kind, InstructionKind::GetMemoryAddress { .. }) {
            let mut metadata = self.results.metadata(result).clone();
            metadata.complex = true;
            self.results.set_metadata(result, metadata, false);
        }
        self.results.set_instruction(result, position);

        let instruction = Instruction::new(kind, result, position);
        for parameter in &instruction.parameters {
            self.results.use_at(parameter.result, position);
        }
        self.results.use_at(result, position);

        match instruction.kind {
            InstructionKind::Move { destination, .. } => {
                self.results.join(result, destination, JoinSettings::Default)
            }
            InstructionKind::GetVariable { value, .. } => {
                self.results.join(result, value, JoinSettings::DisableSend)
            }
            _ => {}
        }

        trace!("append {} {} -> {}", position, instruction.kind.name(), result);
        self.instructions.push(instruction);
        self.position = position + 1;
        result
    }

    pub fn append_label(&mut self, label: Label) {
        self.append(InstructionKind::Label(label), Format::I64);
    }

    pub fn append_jump(&mut self, label: Label) {
        self.append(
            InstructionKind::Jump {
                label,
                condition: None,
            },
            Format::I64,
        );
    }

    /// Append an instruction of no particular format and return its index.
    pub fn append_marker(&mut self, kind: InstructionKind) -> usize {
        let index = self.instructions.len();
        self.append(kind, Format::I64);
        index
    }

    /// Bind the incoming parameters to their argument registers.
    pub fn initialize(&mut self) -> CompileResult<()> {
        let contexts = self.contexts;
        let function = contexts.function(self.function);
        let parameters = function.parameters.clone();
        let formats: Vec<Format> = parameters
            .iter()
            .map(|&p| self.variable_format(p))
            .collect();

        if let Err(limit) = self.target.argument_registers(&formats) {
            return Err(CompileError::TooManyArguments {
                function: function.name.clone(),
                count: parameters.len(),
                limit,
            });
        }

        let results: Vec<ResultId> = parameters
            .iter()
            .zip(&formats)
            .map(|(&variable, &format)| {
                let result = self.results.create(Handle::None, format);
                self.attach_variable(result, variable);
                self.bindings.insert(variable, result);
                result
            })
            .collect();

        self.append(
            InstructionKind::Initialize {
                parameters: results,
            },
            Format::I64,
        );
        Ok(())
    }

    /// Append the implicit return at the end of the function body.
    pub fn finish(&mut self) {
        let returns = matches!(
            self.instructions.last().map(|i| &i.kind),
            Some(InstructionKind::Return { .. })
        );
        if !returns {
            self.append(InstructionKind::Return { value: None }, Format::I64);
        }
    }

    pub fn variable_format(&self, variable: VariableId) -> Format {
        self.contexts
            .variable(variable)
            .type_id
            .map(|t| self.contexts.ty(t).format())
            .unwrap_or(Format::I64)
    }

    pub fn attach_variable(&mut self, result: ResultId, variable: VariableId) {
        let mut metadata = self.results.metadata(result).clone();
        if !metadata.variables.contains(&variable) {
            metadata.variables.push(variable);
        }
        self.results.set_metadata(result, metadata, false);
    }

    /// Current value of a local or parameter. An unbound variable lives in its frame slot.
    pub fn get_variable(&mut self, variable: VariableId) -> CompileResult<ResultId> {
        if let Some(&result) = self.bindings.get(&variable) {
            return Ok(result);
        }

        let contexts = self.contexts;
        let declaration = contexts.variable(variable);
        match declaration.category {
            VariableCategory::Local | VariableCategory::Parameter => {
                Ok(self.create_unbound(variable))
            }
            VariableCategory::Member { .. } => Err(CompileError::internal(format!(
                "member '{}' accessed without an object",
                declaration.name
            ))),
            VariableCategory::Global => Err(CompileError::Unsupported {
                operation: format!("global variable '{}'", declaration.name),
                architecture: self.config.architecture,
            }),
        }
    }

    /// Bind an unassigned variable to its frame slot.
    pub fn create_unbound(&mut self, variable: VariableId) -> ResultId {
        let format = self.variable_format(variable);
        let result = self
            .results
            .create(Handle::StackVariable(variable), format);
        self.attach_variable(result, variable);
        self.bindings.insert(variable, result);
        trace!("variable {} is unbound, using {}", variable.0, result);
        result
    }

    pub fn bind(&mut self, variable: VariableId, result: ResultId) {
        self.attach_variable(result, variable);
        self.bindings.insert(variable, result);
    }

    /// Bindings sorted by variable.
    pub fn actives(&self) -> Vec<(VariableId, ResultId)> {
        let mut actives: Vec<_> = self.bindings.iter().map(|(&v, &r)| (v, r)).collect();
        actives.sort();
        actives
    }

    pub fn state(&self) -> UnitState {
        UnitState {
            bindings: self.bindings.clone(),
            scope_depth: self.scopes.len(),
            position: self.instructions.len(),
        }
    }

    pub fn set_state(&mut self, state: UnitState) {
        self.bindings = state.bindings;
        self.scopes.truncate(state.scope_depth);
    }

    /// Run the build pass over every appended instruction.
    pub fn build(&mut self) -> CompileResult<()> {
        if self.built {
            return Err(CompileError::internal("unit was already built"));
        }
        self.built = true;
        debug!(
            "building {} instructions of {}",
            self.instructions.len(),
            self.symbol
        );

        for index in 0..self.instructions.len() {
            self.position = index;
            self.release_expired()?;

            let kind = self.instructions[index].kind.clone();
            let result = self.instructions[index].result;
            self.build_instruction(index, &kind, result)?;
            self.registers.unlock_all();

            let operations = std::mem::take(&mut self.operations);
            trace!(
                "built {} {} with {} operation(s)",
                index,
                kind.name(),
                operations.len()
            );
            self.instructions[index].operations = operations;
        }
        Ok(())
    }

    /// Free registers whose owner has expired or has moved elsewhere.
    fn release_expired(&mut self) -> CompileResult<()> {
        for (register, owner) in self.registers.occupants() {
            let stale = self.results.handle(owner).register() != Some(register);
            if stale || !self.results.is_valid(owner, self.position) {
                self.registers.free_register(register)?;
            }
        }
        Ok(())
    }

    pub(crate) fn build_state(&self) -> BuildState {
        BuildState {
            occupancy: self.registers.occupancy(),
            handles: self.results.handles(),
        }
    }

    pub(crate) fn restore_build_state(&mut self, state: &BuildState) {
        self.registers.restore(&state.occupancy);
        self.results.restore_handles(&state.handles, |_| false);
    }

    /// Constant data identifier of a value; equal values share one entry.
    pub(crate) fn constant_data(&mut self, value: Number) -> String {
        let bits = |n: &Number| match n {
            Number::Integer(i) => (*i as u64, false),
            Number::Decimal(d) => (d.to_bits(), true),
        };
        if let Some(entry) = self
            .constants
            .iter()
            .find(|entry| bits(&entry.value) == bits(&value))
        {
            return entry.identifier.clone();
        }

        let identifier = format!("{}_C{}", self.symbol, self.constants.len());
        self.constants.push(ConstantEntry {
            identifier: identifier.clone(),
            value,
            size: Size::Qword,
        });
        identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GLOBAL;
    use crate::core::config::Architecture;

    fn contexts() -> (ContextTree, FunctionId) {
        let mut contexts = ContextTree::new();
        let i64 = contexts.primitives().i64;
        let function = contexts
            .declare_function(GLOBAL, "f", &[("a", Some(i64))], Some(i64))
            .unwrap();
        (contexts, function)
    }

    #[test]
    fn test_append_extends_parameter_lifetimes() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (contexts, function) = contexts();
        let mut tree = SyntaxTree::new();
        let mut unit = Unit::new(&mut tree, &contexts, function, BackendConfig::new(Architecture::X64));
        unit.initialize().unwrap();

        let parameter = contexts.function(function).parameters[0];
        let value = unit.get_variable(parameter).unwrap();
        let one = unit.create_constant(Number::Integer(1), Format::I64);
        let sum = unit.append(
            InstructionKind::Addition {
                first: value,
                second: one,
            },
            Format::I64,
        );

        assert!(unit.results().is_valid(value, 0));
        assert!(unit.results().is_valid(value, 1));
        assert!(unit.results().is_expiring(value, 1));
        assert_eq!(unit.results().instruction(sum), Some(1));
        assert_eq!(unit.results().metadata(value).variables, vec![parameter]);
    }

    #[test]
    fn test_constant_data_is_shared() {
        let (contexts, function) = contexts();
        let mut tree = SyntaxTree::new();
        let mut unit = Unit::new(&mut tree, &contexts, function, BackendConfig::new(Architecture::Arm64));
        let a = unit.constant_data(Number::Decimal(1.5));
        let b = unit.constant_data(Number::Decimal(2.5));
        let c = unit.constant_data(Number::Decimal(1.5));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(unit.constants().len(), 2);
    }

    #[test]
    fn test_states_restore_bindings() {
        let (contexts, function) = contexts();
        let mut tree = SyntaxTree::new();
        let mut unit = Unit::new(&mut tree, &contexts, function, BackendConfig::new(Architecture::X64));
        unit.initialize().unwrap();

        let parameter = contexts.function(function).parameters[0];
        let before = unit.state();
        let seven = unit.create_constant(Number::Integer(7), Format::I64);
        unit.bind(parameter, seven);
        assert_eq!(unit.get_variable(parameter).unwrap(), seven);

        unit.set_state(before);
        assert_ne!(unit.get_variable(parameter).unwrap(), seven);
    }
}
