//! The Erkao bytecode instruction set
//!
//! One byte per opcode; operands are fixed-width per opcode and big-endian.
//! Jump offsets are unsigned 16-bit displacements measured from the byte
//! *after* the jump's operands — forward for `Jump`/`JumpIfFalse`, backward
//! for `Loop`. The stack is the sole data path; locals live in environment
//! records keyed by interned strings.

macro_rules! op_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident {
        $($(#[$vmeta:meta])* $vname:ident = $width:expr,)*
    }) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $vname,)*
        }

        impl $name {
            /// Decode a code byte. Returns `None` for bytes outside the set,
            /// which the disassembler and verifier report instead of panicking.
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $(x if x == $name::$vname as u8 => Some($name::$vname),)*
                    _ => None,
                }
            }

            /// Fixed operand width in bytes. `ExportFrom` additionally carries
            /// a variable tail of `n` big-endian u16 pairs after its fixed
            /// count operand; callers that walk code must account for it.
            pub fn operand_width(self) -> usize {
                match self {
                    $($name::$vname => $width,)*
                }
            }
        }
    }
}

op_enum! {
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        /// `Constant k:u16` — push `constants[k]`.
        Constant = 2,
        /// Push `null`.
        Null = 0,
        /// Push `true`.
        True = 0,
        /// Push `false`.
        False = 0,

        /// Pop and discard the top of the stack.
        Pop = 0,
        /// Coerce the top of the stack to its String rendering.
        Stringify = 0,

        /// `DefineVar name:u16` — bind top of stack as a mutable variable in
        /// the current environment; pops.
        DefineVar = 2,
        /// `DefineConst name:u16` — like `DefineVar` but immutable.
        DefineConst = 2,
        /// `GetVar name:u16` — push the variable's value; walks the
        /// environment chain outward.
        GetVar = 2,
        /// `SetVar name:u16` — assign the nearest binding; the value stays on
        /// the stack (assignment is an expression).
        SetVar = 2,
        /// `GetThis name:u16` — push the current receiver.
        GetThis = 2,

        /// `GetProperty name:u16` — pop receiver, push member. Feeds the
        /// FIELD/METHOD inline cache at its site.
        GetProperty = 2,
        /// `GetPropertyOptional name:u16` — as `GetProperty` but a null
        /// receiver propagates null instead of erroring.
        GetPropertyOptional = 2,
        /// `SetProperty name:u16` — pop value then receiver, store member,
        /// push the value back.
        SetProperty = 2,
        /// Pop index then receiver, push element.
        GetIndex = 0,
        /// As `GetIndex` but a null receiver propagates null.
        GetIndexOptional = 0,
        /// Pop value, index, receiver; store; push the value back.
        SetIndex = 0,

        /// Two numbers sum; two strings concatenate; anything else is a
        /// runtime error.
        Add = 0,
        Subtract = 0,
        Multiply = 0,
        Divide = 0,
        Negate = 0,
        Not = 0,
        Equal = 0,
        Greater = 0,
        GreaterEqual = 0,
        Less = 0,
        LessEqual = 0,

        /// `Jump off:u16` — unconditional forward jump.
        Jump = 2,
        /// `JumpIfFalse off:u16` — peeks the top of the stack; does NOT pop.
        /// Short-circuit `and`/`or` rely on the deciding value staying put.
        JumpIfFalse = 2,
        /// `Loop off:u16` — backward jump.
        Loop = 2,

        /// `Call argc:u8` — call the value under `argc` arguments.
        Call = 1,
        /// `CallOptional argc:u8` — as `Call`, but a null callee short-circuits
        /// to null (arguments are discarded unevaluated side effects excluded).
        CallOptional = 1,
        /// `Invoke name:u16 argc:u8` — fused method lookup + call. Feeds the
        /// METHOD inline cache at its site.
        Invoke = 3,
        /// Push the current invocation's argument count; used by the
        /// default-argument prologue.
        ArgCount = 0,

        /// `Closure k:u16` — clone the prototype Function at `constants[k]`
        /// and bind the current environment.
        Closure = 2,

        /// Return the top of the stack from the current function.
        Return = 0,
        /// `Try off:u16` — install a handler frame whose catch code starts at
        /// the forward offset.
        Try = 2,
        /// Pop the innermost handler frame.
        EndTry = 0,
        /// Pop the exception value and unwind to the innermost handler; fatal
        /// if none is installed.
        Throw = 0,
        /// Unwrap an Option-shaped value or rethrow a thrown value.
        TryUnwrap = 0,

        /// Open a new environment record.
        BeginScope = 0,
        /// Close the current environment record. Deferred calls registered in
        /// the scope run in LIFO order first.
        EndScope = 0,

        /// `Import hasAlias:u8 alias:u16` — pop the path string, load the
        /// module (cached by canonical path), bind its exports map either
        /// under `alias` or under the module's basename.
        Import = 3,
        /// Pop the path string, load the module, push its exports map.
        ImportModule = 0,
        /// `Export name:u16` — publish the named binding from the current
        /// scope.
        Export = 2,
        /// `ExportValue name:u16` — pop a value and publish it under `name`
        /// (`export default`).
        ExportValue = 2,
        /// `ExportFrom n:u16 [from:u16 to:u16]…` — pop a module's exports map
        /// and re-publish `n` renamed entries. Variable-width tail.
        ExportFrom = 2,
        /// `Private name:u16` — mark a binding non-exportable.
        Private = 2,

        /// `Array n:u16` — pop `n` elements, push a new array (capacity
        /// reserved up front).
        Array = 2,
        /// Pop a value and append it to the array beneath it.
        ArrayAppend = 0,
        /// `Map n:u16` — pop `n` key/value pairs, push a new map.
        Map = 2,
        /// Pop value then key, insert into the map beneath; map stays.
        MapSet = 0,
        /// Pop key then map; push presence as a bool. Presence is reported
        /// without reading the value.
        MapHas = 0,
        /// Pop an array/map/string, push its length.
        Len = 0,
        IsArray = 0,
        IsMap = 0,

        /// `MatchEnum enum:u16 variant:u16` — peek the scrutinee; push whether
        /// it is the named variant of the named enum.
        MatchEnum = 4,

        /// Yield point: the collector may run here and nowhere else.
        Gc = 0,
    }
}
