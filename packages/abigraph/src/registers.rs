use crate::ArcStr;

/// DWARF register number -> name, per the psABI of the target arch.
/// Unknown numbers and arches fall back to the `rN` spelling.
pub fn reg_name(arch: &str, n: u16) -> ArcStr {
    let name = match arch {
        "x86-64" | "x86_64" => x86_64(n),
        "x86" | "i386" => x86(n),
        "aarch64" | "AArch64" => aarch64(n),
        _ => None,
    };
    match name {
        Some(x) => ArcStr::new(x),
        None => ArcStr::from(format!("r{n}")),
    }
}

fn x86_64(n: u16) -> Option<&'static str> {
    Some(match n {
        0 => "rax",
        1 => "rdx",
        2 => "rcx",
        3 => "rbx",
        4 => "rsi",
        5 => "rdi",
        6 => "rbp",
        7 => "rsp",
        8 => "r8",
        9 => "r9",
        10 => "r10",
        11 => "r11",
        12 => "r12",
        13 => "r13",
        14 => "r14",
        15 => "r15",
        16 => "rip",
        17 => "xmm0",
        18 => "xmm1",
        19 => "xmm2",
        20 => "xmm3",
        21 => "xmm4",
        22 => "xmm5",
        23 => "xmm6",
        24 => "xmm7",
        _ => return None,
    })
}

fn x86(n: u16) -> Option<&'static str> {
    Some(match n {
        0 => "eax",
        1 => "ecx",
        2 => "edx",
        3 => "ebx",
        4 => "esp",
        5 => "ebp",
        6 => "esi",
        7 => "edi",
        8 => "eip",
        _ => return None,
    })
}

fn aarch64(n: u16) -> Option<&'static str> {
    const X: [&str; 31] = [
        "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13",
        "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26",
        "x27", "x28", "x29", "x30",
    ];
    match n {
        0..=30 => Some(X[n as usize]),
        31 => Some("sp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_names() {
        assert_eq!(reg_name("x86-64", 5), "rdi");
        assert_eq!(reg_name("x86", 0), "eax");
        assert_eq!(reg_name("aarch64", 31), "sp");
        assert_eq!(reg_name("ppc64", 3), "r3");
        assert_eq!(reg_name("x86-64", 99), "r99");
    }
}
