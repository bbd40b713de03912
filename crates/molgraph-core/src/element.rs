//! Periodic table lookups used by the SMILES reader.

const ELEMENT_LIST: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

/// Atomic number for an element symbol (case sensitive, e.g. `"Cl"`).
pub fn atomic_number(symbol: &str) -> Option<u8> {
    ELEMENT_LIST
        .iter()
        .position(|&s| s == symbol)
        .map(|idx| idx as u8 + 1)
}

/// Element symbol for an atomic number; `0` is the SMILES wildcard `*`.
pub fn symbol(atomic_number: u8) -> &'static str {
    match atomic_number {
        0 => "*",
        n => ELEMENT_LIST.get(n as usize - 1).copied().unwrap_or("*"),
    }
}

#[rustfmt::skip]
/// Normal valences of the SMILES organic subset, smallest first.
pub fn default_valences(atomic_number: u8) -> &'static [u8] {
    match atomic_number {
        5 => &[3],          // B
        6 => &[4],          // C
        7 => &[3, 5],       // N
        8 => &[2],          // O
        15 => &[3, 5],      // P
        16 => &[2, 4, 6],   // S
        9 | 17 | 35 | 53 => &[1],
        _ => &[],
    }
}

/// Elements that may appear without brackets.
pub fn is_organic_subset(atomic_number: u8) -> bool {
    !default_valences(atomic_number).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_lookup() {
        assert_eq!(atomic_number("C"), Some(6));
        assert_eq!(atomic_number("Cl"), Some(17));
        assert_eq!(atomic_number("Og"), Some(118));
        assert_eq!(atomic_number("Xx"), None);
        assert_eq!(symbol(8), "O");
        assert_eq!(symbol(0), "*");
    }

    #[test]
    fn test_valences() {
        assert_eq!(default_valences(16), &[2, 4, 6]);
        assert!(is_organic_subset(35));
        assert!(!is_organic_subset(26));
    }
}
