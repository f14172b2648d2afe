use crate::{
    allocator::SlotAllocator,
    arena::Arena,
    ast::{Expr, ExprBody, Statement, Var},
    constant::LiteralPool,
    error::CompileError,
    opcode::{OpCode, Routine, RoutineBuilder},
};

/// Translates one statement at a time into a routine.
///
/// Slots are resolved while compiling, against the data section as the
/// previous routines left it, and baked into the routine as absolute
/// addresses.
pub(crate) struct Compiler<'run> {
    builder: RoutineBuilder,
    arena: &'run mut Arena,
    allocator: &'run mut SlotAllocator,
    literals: &'run mut LiteralPool,
}

impl<'run> Compiler<'run> {
    pub(crate) fn new(
        arena: &'run mut Arena,
        allocator: &'run mut SlotAllocator,
        literals: &'run mut LiteralPool,
    ) -> Self {
        Self {
            builder: RoutineBuilder::default(),
            arena,
            allocator,
            literals,
        }
    }

    fn build(mut self) -> Result<Routine, CompileError> {
        let capacity = self.arena.code_size() as usize;
        if self.builder.len() > capacity {
            return Err(CompileError::CodeSectionOverflow {
                len: self.builder.len(),
                capacity,
            });
        }
        Ok(self.builder.build())
    }

    fn slot_address(&mut self, var: &Var) -> Result<u64, CompileError> {
        let slot = self.allocator.slot_for(self.arena, var)?;
        Ok(self.arena.data_base() + slot)
    }

    fn push_binop(&mut self, opcode: OpCode, lhs: Expr<'_>, rhs: Expr<'_>) -> Result<(), CompileError> {
        // The right operand goes in first so the left one ends up on top.
        self.push_expr(rhs)?;
        self.push_expr(lhs)?;
        self.builder.push_op(opcode);
        Ok(())
    }

    fn push_int(&mut self, value: u64) {
        self.builder.push_op_with(OpCode::Push, 0);
        self.builder.push_op_with(OpCode::Push, value);
    }

    fn push_expr(&mut self, expr: Expr<'_>) -> Result<(), CompileError> {
        match expr {
            ExprBody::Int(value) => self.push_int(*value),
            ExprBody::Str(content) => {
                let header = self.literals.intern(self.arena, content)?;
                for word in header.words().into_iter().rev() {
                    self.builder.push_op_with(OpCode::Push, word);
                }
            }
            ExprBody::Var(var) => {
                let address = self.slot_address(var)?;
                self.builder.push_op_with(OpCode::Load, address);
            }
            ExprBody::Add(lhs, rhs) => self.push_binop(OpCode::Add, lhs, rhs)?,
            ExprBody::Sub(lhs, rhs) => self.push_binop(OpCode::Sub, lhs, rhs)?,
            ExprBody::Mul(lhs, rhs) => self.push_binop(OpCode::Mul, lhs, rhs)?,
            ExprBody::Neg(operand) => {
                self.push_expr(operand)?;
                self.push_int(0);
                self.builder.push_op(OpCode::Sub);
            }
        }
        Ok(())
    }

    fn push_statement(&mut self, statement: &Statement<'_>) -> Result<(), CompileError> {
        match statement {
            Statement::Assign(var, expr) => {
                self.push_expr(expr)?;
                let address = self.slot_address(var)?;
                self.builder.push_op_with(OpCode::Store, address);
            }
            Statement::Print(var) => {
                let address = self.slot_address(var)?;
                self.builder.push_op_with(OpCode::Print, address);
            }
            Statement::Delete(var) => {
                let slot = self.allocator.release(self.arena, var)?;
                let address = self.arena.data_base() + slot;
                self.builder.push_op_with(OpCode::Release, address);
            }
            Statement::PrintLog => self.builder.push_op(OpCode::PrintLog),
        }
        Ok(())
    }
}

/// Compile `statement` into a routine framed by the stack switch.
pub(crate) fn compile(
    statement: &Statement<'_>,
    arena: &mut Arena,
    allocator: &mut SlotAllocator,
    literals: &mut LiteralPool,
) -> Result<Routine, CompileError> {
    let mut compiler = Compiler::new(arena, allocator, literals);
    compiler.builder.push_op(OpCode::Enter);
    compiler.push_statement(statement)?;
    compiler.builder.push_op(OpCode::Leave);
    compiler.builder.push_op(OpCode::Return);
    compiler.build()
}

#[cfg(test)]
mod tests {
    use typed_arena::Arena as AstArena;

    use super::*;
    use crate::{config::EngineConfig, error::AllocationFailure};

    struct Fixture {
        arena: Arena,
        allocator: SlotAllocator,
        literals: LiteralPool,
    }

    impl Fixture {
        fn new(config: &EngineConfig) -> Self {
            let mut arena = Arena::create(config).unwrap();
            arena.initialize();
            let literals = LiteralPool::new(&arena);
            Self {
                arena,
                allocator: SlotAllocator::new(),
                literals,
            }
        }

        fn compile(&mut self, statement: &Statement<'_>) -> Result<Routine, CompileError> {
            compile(statement, &mut self.arena, &mut self.allocator, &mut self.literals)
        }
    }

    #[test]
    fn assignment_pushes_right_operand_first() {
        let ast = AstArena::new();
        let lhs = ast.alloc(ExprBody::Int(2));
        let rhs = ast.alloc(ExprBody::Int(3));
        let sum = ast.alloc(ExprBody::Add(lhs, rhs));
        let mut fixture = Fixture::new(&EngineConfig::default());

        let routine = fixture.compile(&Statement::Assign(Var::new("x"), sum)).unwrap();
        insta::assert_snapshot!(routine.listing("x = 2 + 3;").trim_end(), @r###"
        ==== x = 2 + 3; ====
        0000 | OP_ENTER
        0001 | OP_PUSH      | 0x0
        0010 | OP_PUSH      | 0x3
        0019 | OP_PUSH      | 0x0
        0028 | OP_PUSH      | 0x2
        0037 | OP_ADD
        0038 | OP_STORE     | 0x60000010
        0047 | OP_LEAVE
        0048 | OP_RETURN
        "###);
    }

    #[test]
    fn negation_subtracts_from_zero() {
        let ast = AstArena::new();
        let five = ast.alloc(ExprBody::Int(5));
        let neg = ast.alloc(ExprBody::Neg(five));
        let mut fixture = Fixture::new(&EngineConfig::default());

        let routine = fixture.compile(&Statement::Assign(Var::new("x"), neg)).unwrap();
        let code = routine.code();
        // ENTER, PUSH 0, PUSH 5, PUSH 0, PUSH 0, SUB
        assert_eq!(code[0], OpCode::Enter as u8);
        assert_eq!(code[37], OpCode::Sub as u8);
    }

    #[test]
    fn string_literal_lands_in_literal_section() {
        let ast = AstArena::new();
        let hello = ast.alloc(ExprBody::Str(b"hello".to_vec()));
        let mut fixture = Fixture::new(&EngineConfig::default());

        fixture.compile(&Statement::Assign(Var::new("s"), hello)).unwrap();
        let base = fixture.arena.literal_base();
        assert_eq!(fixture.arena.slice(base, 6).unwrap(), b"hello\0");
    }

    #[test]
    fn invalid_name_aborts_compilation() {
        let mut fixture = Fixture::new(&EngineConfig::default());
        let err = fixture.compile(&Statement::Print(Var::new("long"))).unwrap_err();
        assert_eq!(
            err,
            CompileError::Allocation(AllocationFailure::InvalidName { name: "long".into() })
        );
    }

    #[test]
    fn delete_unbinds_the_name() {
        let mut fixture = Fixture::new(&EngineConfig::default());
        fixture.compile(&Statement::Print(Var::new("x"))).unwrap();
        assert_eq!(fixture.allocator.lookup("x"), Some(0));

        fixture.compile(&Statement::Delete(Var::new("x"))).unwrap();
        assert_eq!(fixture.allocator.lookup("x"), None);
    }

    #[test]
    fn oversized_routine_is_rejected() {
        let config = EngineConfig {
            code_section_size: 32,
            ..EngineConfig::default()
        };
        let ast = AstArena::new();
        let lhs = ast.alloc(ExprBody::Int(1));
        let rhs = ast.alloc(ExprBody::Int(1));
        let sum = ast.alloc(ExprBody::Add(lhs, rhs));
        let mut fixture = Fixture::new(&config);

        let err = fixture.compile(&Statement::Assign(Var::new("x"), sum)).unwrap_err();
        assert_eq!(err, CompileError::CodeSectionOverflow { len: 49, capacity: 32 });
    }
}
