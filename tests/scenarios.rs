//! End-to-end scenarios: source text through the assembler and linker, then
//! executed on the machine.

use std::rc::Rc;

use cursedvm::asm::assemble_and_link;
use cursedvm::environment::HostArg;
use cursedvm::{ExtRef, Fault, HostValue, Region, SlotName, Value, CVM};

fn boot(source: &str) -> CVM {
  let program = assemble_and_link(source).unwrap();
  let mut vm = CVM::new();
  vm.load_program(&program).unwrap();
  vm
}

#[test]
fn exit_with_immediate() {
  let mut vm = boot("exit.i #7");
  assert_eq!(vm.run().unwrap(), Value::Int(7));
  assert!(vm.stopped());
}

#[test]
fn add_two_integers() {
  let mut vm = boot(
    "cvt.int.i $3, #2
     cvt.int.i $4, #3
     add $5, $3, $4
     exit.r $5",
  );
  assert_eq!(vm.run().unwrap(), Value::Int(5));
}

#[test]
fn float_division() {
  let mut vm = boot(
    "cvt.float.i $3, #1
     cvt.float.i $4, #2
     div.f $5, $3, $4
     exit.r $5",
  );
  assert_eq!(vm.run().unwrap(), Value::Float(0.5));
}

#[test]
fn conditional_branch_on_comparison() {
  let source = "c.eq.i $3, #4; bc.i #2; exit.i #0; exit.i #1";

  let mut vm = boot(source);
  vm.set_register(3, Value::Int(4)).unwrap();
  assert_eq!(vm.run().unwrap(), Value::Int(1));

  let mut vm = boot(source);
  vm.set_register(3, Value::Int(5)).unwrap();
  assert_eq!(vm.run().unwrap(), Value::Int(0));
}

#[test]
fn backward_branch_word_carries_minus_one() {
  let program = assemble_and_link("start: cvt.int.i $3, #1\nb.i ^start").unwrap();
  assert_eq!(program[1] & 0xFFFF, 0xFFFF);
}

#[test]
fn external_call_through_the_environment() {
  let mut vm = boot(
    "push.i #1
     push.i #1
     cvt.ptr.i $3, &idname
     load $4, $3
     call.r $4
     pop $5
     exit.r $5
     idname: .utf8 \"id\"",
  );
  vm.register_native("id", Rc::new(|args: &[HostArg]| {
    match &args[0] {
      HostArg::Number(n) => Some(Rc::new(HostValue::Number(*n))),
      _                  => None,
    }
  }));

  match vm.run().unwrap() {
    Value::Ext(ext) => {
      assert!(matches!(&*ext.0, HostValue::Number(n) if *n == 1.0));
    }
    other => panic!("expected an Ext result, found {}", other),
  }
}

#[test]
fn declared_host_function_pops_fixed_arity() {
  let mut vm = boot(
    "push.r $24
     push.r $25
     cvt.ptr.i $3, &name
     load $4, $3
     call.r $4
     pop $5
     exit.r $5
     name: .utf8 \"pair\"",
  );
  vm.declare_host_function("pair", 2, Rc::new(|args: &[Value]| {
    match (&args[0], &args[1]) {
      (Value::Int(a), Value::Int(b)) => Some(Rc::new(HostValue::Number((a * 10 + b) as f64))),
      _                              => None,
    }
  }));
  vm.set_register(SlotName::P0 as u8, Value::Int(2)).unwrap();
  vm.set_register(SlotName::P1 as u8, Value::Int(7)).unwrap();

  match vm.run().unwrap() {
    // P1 was pushed last, so it is the first argument off the stack.
    Value::Ext(ext) => {
      assert!(matches!(&*ext.0, HostValue::Number(n) if *n == 72.0));
    }
    other => panic!("expected an Ext result, found {}", other),
  }
}

#[test]
fn ipush_defers_an_irs_push() {
  let mut vm = boot(
    "push.r $0
     ipush #12
     pop.i $5
     pop $6
     exit.r $5",
  );
  assert_eq!(vm.run().unwrap(), Value::Int(12));
}

#[test]
fn environment_round_trip_through_strings() {
  let mut vm = boot(
    "cvt.ptr.i $3, &key
     cvt.int.i $4, #41
     set $4, $3
     get $5, $3
     exit.r $5
     key: .utf8 \"answer\"",
  );
  assert_eq!(vm.run().unwrap(), Value::Float(41.0));
  assert!(matches!(
    vm.get_environment("answer").as_deref(),
    Some(HostValue::Number(n)) if *n == 41.0
  ));
}

#[test]
fn float_literals_load_through_rodata() {
  let mut vm = boot(
    "cvt.ptr.i $3, F#2.5
     read.float $4, $3, $0
     exit.r $4",
  );
  assert_eq!(vm.run().unwrap(), Value::Float(2.5));
}

#[test]
fn macro_expanded_program_runs() {
  let mut vm = boot(
    "DEFINEX (seti;?reg;?val) cvt.int.i ?reg, #?val
     DEFINE result $5
     [seti] $3 30
     [seti] $4 12
     sub [result], $3, $4
     exit.r [result]",
  );
  assert_eq!(vm.run().unwrap(), Value::Int(18));
}

#[test]
fn division_by_zero_is_a_domain_fault() {
  let mut vm = boot(
    "cvt.int.i $3, #1
     cvt.int.i $4, #0
     div $5, $3, $4",
  );
  let fault = vm.run().unwrap_err();
  assert!(matches!(fault, Fault::Domain(_)));
}

#[test]
fn modulo_by_zero_is_a_domain_fault() {
  let mut vm = boot(
    "cvt.int.i $3, #9
     cvt.int.i $4, #0
     mod $5, $3, $4",
  );
  assert!(matches!(vm.run().unwrap_err(), Fault::Domain(_)));
}

#[test]
fn pointer_arithmetic_keeps_the_region() {
  let mut vm = boot(
    "cvt.ptr.i $3, #10
     cvt.int.i $4, #5
     add $5, $3, $4
     exit.r $5",
  );
  assert_eq!(vm.run().unwrap(), Value::Ptr(Region::Word, 15));
}

#[test]
fn bitwise_pair_selection() {
  let mut vm = boot(
    "cvt.int.i $3, #12
     cvt.int.i $4, #10
     and $5, $3, $4
     or $6, $3, $4
     xor $7, $3, $4
     xnor $8, $3, $4
     exit.i #0",
  );
  vm.run().unwrap();
  assert_eq!(vm.get_register(5).unwrap(), Value::Int(8));
  assert_eq!(vm.get_register(6).unwrap(), Value::Int(14));
  assert_eq!(vm.get_register(7).unwrap(), Value::Int(6));
  assert_eq!(vm.get_register(8).unwrap(), Value::Int(!6));
}

#[test]
fn shifts_mask_their_count() {
  let mut vm = boot(
    "cvt.int.i $3, #1
     cvt.int.i $4, #33
     shl $5, $3, $4
     cvt.int.i $6, #-8
     cvt.int.i $7, #1
     shr $8, $6, $7
     exit.i #0",
  );
  vm.run().unwrap();
  assert_eq!(vm.get_register(5).unwrap(), Value::Int(2));
  assert_eq!(vm.get_register(8).unwrap(), Value::Int(-4));
}

#[test]
fn state_dump_reaches_the_sink() {
  // A shared buffer lets us inspect what the machine printed.
  use std::cell::RefCell;
  use std::io::Write;

  struct Shared(Rc<RefCell<Vec<u8>>>);
  impl Write for Shared {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
      self.0.borrow_mut().extend_from_slice(data);
      Ok(data.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  let buffer = Rc::new(RefCell::new(Vec::new()));
  let mut vm = boot("cvt.int.i $3, #5\nsys.reg $3\nexit.i #0");
  vm.set_sink(Box::new(Shared(buffer.clone())));
  vm.run().unwrap();

  let printed = String::from_utf8(buffer.borrow().clone()).unwrap();
  assert_eq!(printed, "$3 = <Int, 5>\n");
}

#[test]
fn breakpoint_then_resume() {
  let mut vm = boot("brk.state\nexit.i #9");
  vm.set_sink(Box::new(Vec::new()));
  // First run stops at the breakpoint with no exit value.
  assert_eq!(vm.step().unwrap(), None);
  assert!(vm.stopped());
  assert_eq!(vm.exit_value(), None);
  // Resuming runs to the exit.
  assert_eq!(vm.run().unwrap(), Value::Int(9));
}

#[test]
fn faults_leave_state_for_post_mortem() {
  let mut vm = boot(
    "cvt.int.i $3, #77
     cvt.int.i $4, #0
     div $5, $3, $4
     exit.i #0",
  );
  assert!(vm.run().is_err());
  assert!(vm.stopped());
  assert_eq!(vm.get_register(3).unwrap(), Value::Int(77));
  // PC still points at the faulting instruction.
  assert_eq!(vm.get_register(SlotName::PC as u8).unwrap(), Value::Ptr(Region::Word, 2));
}

#[test]
fn ext_identity_through_ext_ref() {
  let vm = {
    let mut vm = CVM::new();
    vm.set_environment("thing", Rc::new(HostValue::Number(3.0)));
    vm
  };
  let handle = vm.get_environment("thing").unwrap();
  assert_eq!(
    Value::Ext(ExtRef(handle.clone())),
    Value::Ext(ExtRef(handle))
  );
}
