/*!

  CursedVM: a small, deliberately idiosyncratic 32-bit big-endian virtual machine
  with a typed value model, a register file with side-effecting special slots, four
  segregated memory regions, host-callable externals, and a companion two-pass
  toolchain (assembler plus linker) that turns textual assembly into an executable
  word stream.

  The embedding surface is the [`CVM`] machine itself plus the [`asm`] module's
  `assemble`/`link` entry points:

  ```
  use cursedvm::{asm, CVM, Value};

  let program = asm::assemble_and_link("exit.i #7").unwrap();
  let mut vm = CVM::new();
  vm.load_program(&program).unwrap();
  assert_eq!(vm.run().unwrap(), Value::Int(7));
  ```

*/

pub mod asm;
pub mod bytecode;
pub mod cvm;
pub mod environment;
pub mod error;
pub mod memory;
pub mod registers;
pub mod value;

pub use bytecode::{Fields, OpClass, Word};
pub use cvm::CVM;
pub use environment::{Environment, HostArg, HostFunction, HostValue};
pub use error::{Fault, LinkError};
pub use registers::SlotName;
pub use value::{ExtRef, Region, Value, ValueKind};
