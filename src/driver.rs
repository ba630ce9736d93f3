//! Runs a binary image on a fresh emulator until it returns or runs out of
//! steps.

use std::collections::BTreeSet;

use crate::emulator::{CpuVariant, Emulator, Machine, RTS_OPCODE};
use crate::errors::DriverError;
use crate::state::{Flag, MachineState, ObservationSet, PartialStateSpec, Register};

pub const DEFAULT_LOAD_ADDRESS: u16 = 0x1000;
pub const DEFAULT_STEP_BUDGET: usize = 10_000;

/// Tracks whether the routine has reached its final `RTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltState {
    Running,
    /// The instruction about to execute is the `RTS` that ends the routine.
    HaltPending,
    Halted,
}

impl HaltState {
    /// Looks at the opcode under the program counter before a step.
    pub fn observe(self, opcode: u8) -> HaltState {
        match self {
            HaltState::Running if opcode == RTS_OPCODE => HaltState::HaltPending,
            other => other,
        }
    }

    /// Advances after a step has retired.
    pub fn retire(self) -> HaltState {
        match self {
            HaltState::HaltPending => HaltState::Halted,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Steps executed, the final `RTS` included.
    pub steps: usize,
    pub cycles: u64,
    pub completed: bool,
}

/// Single-steps `machine` until the halt condition or the budget.
pub fn step_until_halt<M: Machine>(machine: &mut M, budget: usize) -> Result<RunOutcome, DriverError> {
    let mut state = HaltState::Running;
    let mut steps = 0;
    let mut cycles: u64 = 0;

    while steps < budget {
        let pc = machine.pc();
        state = state.observe(machine.read(pc));
        let taken = machine.step().map_err(|source| DriverError::Fault {
            pc,
            steps,
            source,
            trace: Vec::new(),
        })?;
        cycles += taken as u64;
        steps += 1;
        state = state.retire();
        if state == HaltState::Halted {
            break;
        }
    }

    Ok(RunOutcome {
        steps,
        cycles,
        completed: state == HaltState::Halted,
    })
}

/// Overlays the fields a spec names; everything else keeps its value.
pub fn apply_spec<M: Machine>(machine: &mut M, spec: &PartialStateSpec) {
    for register in Register::ALL {
        if let Some(value) = spec.registers.get(register) {
            machine.set_register(register, value);
        }
    }
    for flag in Flag::ALL {
        if let Some(value) = spec.flags.get(flag) {
            machine.set_flag(flag, value);
        }
    }
    for (addr, value) in &spec.memory {
        machine.write(*addr, *value);
    }
}

/// Outcome of one run. The final machine state is only meaningful when
/// `completed` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub steps: usize,
    pub cycles: u64,
    pub completed: bool,
    registers: MachineState,
    memory: Vec<u8>,
    written: BTreeSet<u16>,
    trace: Vec<String>,
}

impl ExecutionResult {
    /// Extracts registers, flags and the observed memory cells.
    pub fn state(&self, observation: &ObservationSet) -> Option<MachineState> {
        if !self.completed {
            return None;
        }
        let mut state = self.registers.clone();
        state.memory = observation
            .iter()
            .map(|addr| (*addr, self.memory[*addr as usize]))
            .collect();
        Some(state)
    }

    /// Addresses written by the program during the run.
    pub fn written(&self) -> &BTreeSet<u16> {
        &self.written
    }

    /// Full 64 KiB image at the end of the run.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Recent instructions, when tracing was enabled.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }
}

#[derive(Debug, Clone)]
pub struct Driver {
    pub load_address: u16,
    pub step_budget: usize,
    pub variant: CpuVariant,
    pub trace: bool,
}

impl Default for Driver {
    fn default() -> Self {
        Driver {
            load_address: DEFAULT_LOAD_ADDRESS,
            step_budget: DEFAULT_STEP_BUDGET,
            variant: CpuVariant::default(),
            trace: false,
        }
    }
}

impl Driver {
    /// Loads `binary`, applies `init` on top, and runs from the load address.
    pub fn run(
        &self,
        binary: &[u8],
        init: Option<&PartialStateSpec>,
    ) -> Result<ExecutionResult, DriverError> {
        if binary.is_empty() {
            return Err(DriverError::EmptyImage);
        }

        let mut emulator = Emulator::new(self.variant, self.trace);
        emulator.load_image(self.load_address, binary);
        if let Some(spec) = init {
            apply_spec(&mut emulator, spec);
        }
        emulator.set_pc(self.load_address);

        let outcome = step_until_halt(&mut emulator, self.step_budget)
            .map_err(|e| e.with_trace(emulator.call_log()))?;
        tracing::debug!(
            steps = outcome.steps,
            cycles = outcome.cycles,
            completed = outcome.completed,
            "run finished"
        );

        let registers = MachineState {
            a: emulator.register(Register::A),
            x: emulator.register(Register::X),
            y: emulator.register(Register::Y),
            carry: emulator.flag(Flag::C),
            negative: emulator.flag(Flag::N),
            zero: emulator.flag(Flag::Z),
            overflow: emulator.flag(Flag::V),
            memory: Default::default(),
        };

        Ok(ExecutionResult {
            steps: outcome.steps,
            cycles: outcome.cycles,
            completed: outcome.completed,
            registers,
            memory: emulator.memory_image().to_vec(),
            written: emulator.written().clone(),
            trace: emulator.call_log(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::CpuError;

    fn driver(budget: usize) -> Driver {
        Driver {
            step_budget: budget,
            ..Driver::default()
        }
    }

    #[test]
    fn halt_state_machine() {
        let state = HaltState::Running.observe(0xa9);
        assert_eq!(state, HaltState::Running);
        assert_eq!(state.retire(), HaltState::Running);

        let state = HaltState::Running.observe(RTS_OPCODE);
        assert_eq!(state, HaltState::HaltPending);
        assert_eq!(state.retire(), HaltState::Halted);
        assert_eq!(HaltState::Halted.observe(0xa9), HaltState::Halted);
    }

    #[test]
    fn lone_rts_takes_one_step() {
        let result = driver(10).run(&[0x60], None).unwrap();
        assert!(result.completed);
        assert_eq!(result.steps, 1);
        assert_eq!(result.cycles, 6);
    }

    #[test]
    fn counts_the_halting_step() {
        // LDA #$60; RTS -- the operand byte must not trigger the halt
        let result = driver(10).run(&[0xa9, 0x60, 0x60], None).unwrap();
        assert!(result.completed);
        assert_eq!(result.steps, 2);
        let state = result.state(&ObservationSet::new()).unwrap();
        assert_eq!(state.a, 0x60);
    }

    #[test]
    fn budget_is_never_exceeded() {
        // JMP $1000
        let result = driver(100).run(&[0x4c, 0x00, 0x10], None).unwrap();
        assert!(!result.completed);
        assert_eq!(result.steps, 100);
        assert!(result.state(&ObservationSet::new()).is_none());
    }

    #[test]
    fn budget_boundary_includes_the_rts() {
        // NOP; NOP; RTS
        let program = [0xea, 0xea, 0x60];
        assert!(driver(3).run(&program, None).unwrap().completed);
        let short = driver(2).run(&program, None).unwrap();
        assert!(!short.completed);
        assert_eq!(short.steps, 2);
    }

    #[test]
    fn init_spec_overlays_fresh_state() {
        let mut init = PartialStateSpec::default();
        init.registers.x = Some(0x02);
        init.flags.c = Some(true);
        init.memory.insert(0x0200, 0xFF);
        // Patch the first code byte: NOP becomes INX.
        init.memory.insert(DEFAULT_LOAD_ADDRESS, 0xe8);

        let result = driver(10).run(&[0xea, 0x60], Some(&init)).unwrap();
        let observe: ObservationSet = [0x0200].into_iter().collect();
        let state = result.state(&observe).unwrap();
        assert_eq!(state.x, 0x03);
        assert_eq!(state.a, 0);
        assert!(state.carry);
        assert!(!state.zero);
        assert_eq!(state.memory.get(&0x0200), Some(&0xFF));
        assert!(result.written().is_empty());
    }

    #[test]
    fn records_program_writes() {
        // LDA #$01; STA $0300; RTS
        let result = driver(10).run(&[0xa9, 0x01, 0x8d, 0x00, 0x03, 0x60], None).unwrap();
        assert!(result.written().contains(&0x0300));
        let observe: ObservationSet = [0x0300, 0x0301].into_iter().collect();
        let state = result.state(&observe).unwrap();
        assert_eq!(state.memory.get(&0x0300), Some(&0x01));
        assert_eq!(state.memory.get(&0x0301), Some(&0x00));
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let mut init = PartialStateSpec::default();
        init.registers.a = Some(0x05);
        let program = [0x0a, 0x69, 0x03, 0x60];
        let first = driver(50).run(&program, Some(&init)).unwrap();
        let second = driver(50).run(&program, Some(&init)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_opcode_is_a_fault() {
        let traced = Driver {
            trace: true,
            ..driver(10)
        };
        // NOP; .byte $02
        let err = traced.run(&[0xea, 0x02], None).unwrap_err();
        match err {
            DriverError::Fault {
                pc,
                steps,
                source,
                trace,
            } => {
                assert_eq!(pc, DEFAULT_LOAD_ADDRESS + 1);
                assert_eq!(steps, 1);
                assert!(matches!(source, CpuError::UnrecognizedOpcode { code: 0x02, .. }));
                assert_eq!(trace.len(), 1);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(matches!(driver(10).run(&[], None), Err(DriverError::EmptyImage)));
    }
}
