// Instruction classes and codes, see include/uapi/linux/bpf_common.h and
// include/uapi/linux/bpf.h.
const BPF_JMP: u8 = 0x05;
const BPF_ALU64: u8 = 0x07;
const BPF_K: u8 = 0x00;
const BPF_MOV: u8 = 0xb0;
const BPF_CALL: u8 = 0x80;
const BPF_EXIT: u8 = 0x90;
const BPF_PSEUDO_CALL: u8 = 1;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BpfReg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
}

/// A single eBPF instruction, laid out as struct bpf_insn.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Insn {
    code: u8,
    regs: u8,
    off: i16,
    imm: i32,
}

impl Insn {
    fn insn(code: u8, dst: u8, src: u8, off: i16, imm: i32) -> Insn {
        // dst_reg:4 and src_reg:4 bitfields.
        #[cfg(target_endian = "little")]
        let regs = (src << 4) | (dst & 0x0f);
        #[cfg(target_endian = "big")]
        let regs = (dst << 4) | (src & 0x0f);

        Insn {
            code,
            regs,
            off,
            imm,
        }
    }

    /// dst = imm
    pub fn mov64_imm(dst: BpfReg, imm: i32) -> Insn {
        Self::insn(BPF_ALU64 | BPF_MOV | BPF_K, dst as u8, 0, 0, imm)
    }

    /// Call a function of the same program, `offset` instructions after the
    /// next one.
    pub fn call_local(offset: i32) -> Insn {
        Self::insn(BPF_JMP | BPF_CALL, 0, BPF_PSEUDO_CALL, 0, offset)
    }

    pub fn exit() -> Insn {
        Self::insn(BPF_JMP | BPF_EXIT, 0, 0, 0, 0)
    }

    /// The smallest valid program body: `return value;`.
    pub fn ret(value: i32) -> Vec<Insn> {
        vec![Self::mov64_imm(BpfReg::R0, value), Self::exit()]
    }
}
