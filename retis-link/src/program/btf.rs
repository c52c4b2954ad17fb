//! Minimal BTF encoder.
//!
//! Freplace targets must come with function information, which in turn needs
//! BTF. We only describe global `int name(void)` functions, enough for
//! subprograms whose body is replaced.

const BTF_MAGIC: u16 = 0xeb9f;
const BTF_VERSION: u8 = 1;
const BTF_HEADER_LEN: u32 = 24;

const BTF_KIND_INT: u32 = 1;
const BTF_KIND_FUNC: u32 = 12;
const BTF_KIND_FUNC_PROTO: u32 = 13;
const BTF_INT_SIGNED: u32 = 1;
const BTF_FUNC_GLOBAL: u32 = 1;

// Fixed type ids.
const INT_TYPE_ID: u32 = 1;
const PROTO_TYPE_ID: u32 = 2;
const FIRST_FUNC_TYPE_ID: u32 = 3;

/// Function starting at a given instruction offset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FuncInfo {
    pub insn_off: u32,
    pub name: String,
}

impl FuncInfo {
    pub fn new(insn_off: u32, name: &str) -> FuncInfo {
        FuncInfo {
            insn_off,
            name: name.to_string(),
        }
    }
}

/// Encoded BTF blob alongside the matching bpf_func_info records.
pub(crate) struct ProgramBtf {
    pub(crate) data: Vec<u8>,
    pub(crate) func_info: Vec<[u32; 2]>,
}

fn btf_info(kind: u32, vlen: u32) -> u32 {
    (kind << 24) | (vlen & 0xffff)
}

pub(crate) fn encode(funcs: &[FuncInfo]) -> ProgramBtf {
    let mut strings = vec![0u8];
    let mut add_str = |s: &str| {
        let off = strings.len() as u32;
        strings.extend_from_slice(s.as_bytes());
        strings.push(0);
        off
    };

    let mut types: Vec<u32> = Vec::new();
    // int
    types.extend([
        add_str("int"),
        btf_info(BTF_KIND_INT, 0),
        4,
        (BTF_INT_SIGNED << 24) | 32,
    ]);
    // int (void)
    types.extend([0, btf_info(BTF_KIND_FUNC_PROTO, 0), INT_TYPE_ID]);

    let mut func_info = Vec::new();
    for (i, func) in funcs.iter().enumerate() {
        types.extend([
            add_str(&func.name),
            btf_info(BTF_KIND_FUNC, BTF_FUNC_GLOBAL),
            PROTO_TYPE_ID,
        ]);
        func_info.push([func.insn_off, FIRST_FUNC_TYPE_ID + i as u32]);
    }

    let type_len = (types.len() * 4) as u32;
    let mut data = Vec::with_capacity(BTF_HEADER_LEN as usize + type_len as usize + strings.len());
    data.extend(BTF_MAGIC.to_ne_bytes());
    data.push(BTF_VERSION);
    data.push(0); // flags
    data.extend(BTF_HEADER_LEN.to_ne_bytes());
    data.extend(0u32.to_ne_bytes()); // type_off
    data.extend(type_len.to_ne_bytes());
    data.extend(type_len.to_ne_bytes()); // str_off
    data.extend((strings.len() as u32).to_ne_bytes());
    types.iter().for_each(|t| data.extend(t.to_ne_bytes()));
    data.extend(strings);

    ProgramBtf { data, func_info }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(data: &[u8], off: usize) -> u32 {
        u32::from_ne_bytes(data[off..off + 4].try_into().unwrap())
    }

    #[test]
    fn encoding() {
        let btf = encode(&[FuncInfo::new(0, "main"), FuncInfo::new(2, "subprog")]);
        let data = &btf.data;

        assert_eq!(u16::from_ne_bytes([data[0], data[1]]), BTF_MAGIC);
        assert_eq!(data[2], BTF_VERSION);
        assert_eq!(u32_at(data, 4), BTF_HEADER_LEN);

        // int (4 words), proto (3 words), 2 funcs (3 words each).
        let type_len = u32_at(data, 12);
        assert_eq!(type_len, (4 + 3 + 3 * 2) * 4);
        assert_eq!(u32_at(data, 16), type_len);

        let str_len = u32_at(data, 20) as usize;
        let strings = &data[(BTF_HEADER_LEN + type_len) as usize..];
        assert_eq!(strings.len(), str_len);
        assert_eq!(strings, b"\0int\0main\0subprog\0");

        // Second function.
        let func = BTF_HEADER_LEN as usize + (4 + 3 + 3) * 4;
        assert_eq!(u32_at(data, func), 10);
        assert_eq!(u32_at(data, func + 4), (BTF_KIND_FUNC << 24) | 1);
        assert_eq!(u32_at(data, func + 8), PROTO_TYPE_ID);

        assert_eq!(btf.func_info, vec![[0, 3], [2, 4]]);
    }
}
