//! SMILES reader.
//!
//! Builds a [`Molecule`] (atoms, bonds and adjacency) from SMILES text and
//! perceives the per-atom/per-bond properties the graph featurizer needs:
//! implicit hydrogens, ring membership, hybridization, conjugation and
//! double-bond stereo.
//!
//! ```
//! use molgraph_core::Molecule;
//! let mol = Molecule::from_smiles("c1ccccc1O").unwrap();
//! assert_eq!(mol.num_atoms(), 7);
//! assert_eq!(mol.num_bonds(), 7);
//! ```
use crate::element;
use crate::error::SmilesError;
use std::collections::HashMap;
use strum::{Display, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum BondType {
    #[strum(serialize = "SINGLE")]
    Single,
    #[strum(serialize = "DOUBLE")]
    Double,
    #[strum(serialize = "TRIPLE")]
    Triple,
    #[strum(serialize = "AROMATIC")]
    Aromatic,
}

impl BondType {
    fn is_multiple(&self) -> bool {
        !matches!(self, BondType::Single)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum BondStereo {
    #[strum(serialize = "STEREONONE")]
    None,
    #[strum(serialize = "STEREOZ")]
    Z,
    #[strum(serialize = "STEREOE")]
    E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum Chirality {
    #[strum(serialize = "CHI_UNSPECIFIED")]
    Unspecified,
    #[strum(serialize = "CHI_TETRAHEDRAL_CW")]
    TetrahedralCw,
    #[strum(serialize = "CHI_TETRAHEDRAL_CCW")]
    TetrahedralCcw,
    #[strum(serialize = "CHI_OTHER")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum Hybridization {
    #[strum(serialize = "SP")]
    Sp,
    #[strum(serialize = "SP2")]
    Sp2,
    #[strum(serialize = "SP3")]
    Sp3,
    #[strum(serialize = "SP3D")]
    Sp3d,
    #[strum(serialize = "SP3D2")]
    Sp3d2,
    #[strum(serialize = "OTHER")]
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// 0 for the `*` wildcard.
    pub atomic_number: u8,
    pub isotope: Option<u16>,
    pub aromatic: bool,
    pub formal_charge: i8,
    /// Hydrogens written inside a bracket atom.
    pub explicit_hydrogens: u8,
    /// Hydrogens implied by the default valence of an organic-subset atom.
    pub implicit_hydrogens: u8,
    pub radical_electrons: u8,
    pub chirality: Chirality,
    pub hybridization: Hybridization,
    pub in_ring: bool,
    pub bracket: bool,
}

impl Atom {
    fn new(atomic_number: u8, aromatic: bool) -> Self {
        Self {
            atomic_number,
            isotope: None,
            aromatic,
            formal_charge: 0,
            explicit_hydrogens: 0,
            implicit_hydrogens: 0,
            radical_electrons: 0,
            chirality: Chirality::Unspecified,
            hybridization: Hybridization::Other,
            in_ring: false,
            bracket: false,
        }
    }

    pub fn total_hydrogens(&self) -> u8 {
        self.explicit_hydrogens.saturating_add(self.implicit_hydrogens)
    }

    pub fn symbol(&self) -> &'static str {
        element::symbol(self.atomic_number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bond {
    pub begin: usize,
    pub end: usize,
    pub bond_type: BondType,
    pub stereo: BondStereo,
    pub in_ring: bool,
    pub conjugated: bool,
}

impl Bond {
    pub fn other(&self, atom: usize) -> usize {
        if self.begin == atom {
            self.end
        } else {
            self.begin
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Molecule {
    pub atoms: Vec<Atom>,
    pub bonds: Vec<Bond>,
    /// `adjacency[i]` holds `(neighbour, bond index)` pairs.
    pub adjacency: Vec<Vec<(usize, usize)>>,
}

impl Molecule {
    pub fn from_smiles(smiles: &str) -> Result<Self, SmilesError> {
        Parser::new(smiles).parse()
    }

    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn num_bonds(&self) -> usize {
        self.bonds.len()
    }

    pub fn degree(&self, atom: usize) -> usize {
        self.adjacency[atom].len()
    }
}

// Parsing -------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum BondSymbol {
    Single,
    Double,
    Triple,
    Aromatic,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy)]
struct RingOpen {
    atom: usize,
    symbol: Option<BondSymbol>,
    position: usize,
}

/// `/` or `\` bond as written: from `from` to `to`, `up` for `/`.
#[derive(Debug, Clone, Copy)]
struct DirectionalBond {
    from: usize,
    to: usize,
    up: bool,
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    adjacency: Vec<Vec<(usize, usize)>>,
    directional: Vec<DirectionalBond>,
    current: Option<usize>,
    pending: Option<(BondSymbol, usize)>,
    branches: Vec<(Option<usize>, usize)>,
    rings: HashMap<u32, RingOpen>,
}

impl Parser {
    fn new(smiles: &str) -> Self {
        Self {
            chars: smiles.chars().collect(),
            pos: 0,
            atoms: Vec::new(),
            bonds: Vec::new(),
            adjacency: Vec::new(),
            directional: Vec::new(),
            current: None,
            pending: None,
            branches: Vec::new(),
            rings: HashMap::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, reason: impl Into<String>) -> SmilesError {
        SmilesError::new(self.pos, reason)
    }

    fn parse(mut self) -> Result<Molecule, SmilesError> {
        if self.chars.iter().all(|c| c.is_whitespace()) {
            return Err(self.error("empty SMILES"));
        }

        while let Some(ch) = self.peek() {
            match ch {
                '-' | '=' | '#' | ':' | '/' | '\\' => {
                    if self.current.is_none() {
                        return Err(self.error(format!("bond '{ch}' has no preceding atom")));
                    }
                    if self.pending.is_some() {
                        return Err(self.error("two consecutive bond symbols"));
                    }
                    let symbol = match ch {
                        '-' => BondSymbol::Single,
                        '=' => BondSymbol::Double,
                        '#' => BondSymbol::Triple,
                        ':' => BondSymbol::Aromatic,
                        '/' => BondSymbol::Up,
                        _ => BondSymbol::Down,
                    };
                    self.pending = Some((symbol, self.pos));
                    self.pos += 1;
                }
                '(' => {
                    if self.current.is_none() {
                        return Err(self.error("branch has no preceding atom"));
                    }
                    if self.pending.is_some() {
                        return Err(self.error("bond symbol before '('"));
                    }
                    self.branches.push((self.current, self.pos));
                    self.pos += 1;
                }
                ')' => {
                    if self.pending.is_some() {
                        return Err(self.error("bond symbol before ')'"));
                    }
                    let (prev, _) = self
                        .branches
                        .pop()
                        .ok_or_else(|| self.error("unmatched ')'"))?;
                    self.current = prev;
                    self.pos += 1;
                }
                '.' => {
                    if self.pending.is_some() {
                        return Err(self.error("bond symbol before '.'"));
                    }
                    self.current = None;
                    self.pos += 1;
                }
                '%' => {
                    let start = self.pos;
                    self.pos += 1;
                    let d1 = self.digit()?;
                    let d2 = self.digit()?;
                    self.ring_bond(d1 * 10 + d2, start)?;
                }
                '0'..='9' => {
                    let start = self.pos;
                    let d = self.digit()?;
                    self.ring_bond(d, start)?;
                }
                '[' => {
                    let atom = self.bracket_atom()?;
                    self.push_atom(atom)?;
                }
                c if c.is_whitespace() => break,
                _ => {
                    let atom = self.organic_atom()?;
                    self.push_atom(atom)?;
                }
            }
        }

        if let Some((symbol, position)) = self.pending {
            return Err(SmilesError::new(
                position,
                format!("dangling bond {symbol:?} at end of SMILES"),
            ));
        }
        if let Some((_, position)) = self.branches.last() {
            return Err(SmilesError::new(*position, "unmatched '('"));
        }
        if let Some((number, open)) = self.rings.iter().min_by_key(|(_, o)| o.position) {
            return Err(SmilesError::new(
                open.position,
                format!("unclosed ring bond {number}"),
            ));
        }
        if self.atoms.is_empty() {
            return Err(self.error("no atoms in SMILES"));
        }

        let mut mol = Molecule {
            atoms: self.atoms,
            bonds: self.bonds,
            adjacency: self.adjacency,
        };
        perceive_rings(&mut mol);
        if let Some(idx) = mol.atoms.iter().position(|a| a.aromatic && !a.in_ring) {
            return Err(SmilesError::new(
                0,
                format!("non-ring atom {idx} marked aromatic"),
            ));
        }
        assign_hydrogens(&mut mol)?;
        assign_hybridization(&mut mol);
        assign_conjugation(&mut mol);
        assign_stereo(&mut mol, &self.directional);
        Ok(mol)
    }

    fn digit(&mut self) -> Result<u32, SmilesError> {
        let d = self
            .peek()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| self.error("expected a digit"))?;
        self.pos += 1;
        Ok(d)
    }

    fn number(&mut self) -> Option<u32> {
        let start = self.pos;
        while matches!(self.peek(), Some('0'..='9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .parse()
            .ok()
    }

    /// Like `number`, but digits too large for a `u32` are an error.
    fn bounded_number(&mut self) -> Result<Option<u32>, SmilesError> {
        let start = self.pos;
        match self.number() {
            None if self.pos > start => Err(SmilesError::new(start, "number out of range")),
            n => Ok(n),
        }
    }

    fn organic_atom(&mut self) -> Result<Atom, SmilesError> {
        let ch = self.peek().ok_or_else(|| self.error("expected an atom"))?;
        let (symbol, aromatic, width) = match (ch, self.peek_at(1)) {
            ('C', Some('l')) => ("Cl".to_string(), false, 2),
            ('B', Some('r')) => ("Br".to_string(), false, 2),
            ('B' | 'C' | 'N' | 'O' | 'P' | 'S' | 'F' | 'I', _) => (ch.to_string(), false, 1),
            ('b' | 'c' | 'n' | 'o' | 'p' | 's', _) => (ch.to_string(), true, 1),
            ('*', _) => ("*".to_string(), false, 1),
            _ => return Err(self.error(format!("unexpected character '{ch}'"))),
        };
        let atomic_number = if symbol == "*" {
            0
        } else {
            element::atomic_number(&capitalize(&symbol))
                .ok_or_else(|| self.error(format!("unknown element '{symbol}'")))?
        };
        self.pos += width;
        Ok(Atom::new(atomic_number, aromatic))
    }

    fn chars_str(&self, len: usize) -> String {
        self.chars[self.pos..(self.pos + len).min(self.chars.len())]
            .iter()
            .collect()
    }

    fn bracket_atom(&mut self) -> Result<Atom, SmilesError> {
        let open = self.pos;
        self.pos += 1; // '['

        let isotope = self.number().map(|n| n as u16);

        let ch = self
            .peek()
            .ok_or_else(|| self.error("unterminated bracket atom"))?;
        let (atomic_number, aromatic) = if ch == '*' {
            self.pos += 1;
            (0, false)
        } else if ch.is_ascii_uppercase() {
            let two: String = self.chars_str(2);
            match self.peek_at(1) {
                Some(c2) if c2.is_ascii_lowercase() && element::atomic_number(&two).is_some() => {
                    self.pos += 2;
                    (element::atomic_number(&two).unwrap_or_default(), false)
                }
                _ => {
                    let one = ch.to_string();
                    let z = element::atomic_number(&one)
                        .ok_or_else(|| self.error(format!("unknown element '{one}'")))?;
                    self.pos += 1;
                    (z, false)
                }
            }
        } else if ch.is_ascii_lowercase() {
            let two: String = self.chars_str(2);
            if matches!(two.as_str(), "se" | "as" | "te") {
                self.pos += 2;
                (
                    element::atomic_number(&capitalize(&two)).unwrap_or_default(),
                    true,
                )
            } else if matches!(ch, 'b' | 'c' | 'n' | 'o' | 'p' | 's') {
                self.pos += 1;
                (
                    element::atomic_number(&ch.to_ascii_uppercase().to_string())
                        .unwrap_or_default(),
                    true,
                )
            } else {
                return Err(self.error(format!("unknown aromatic element '{ch}'")));
            }
        } else {
            return Err(self.error(format!("unexpected character '{ch}' in bracket atom")));
        };

        let mut atom = Atom::new(atomic_number, aromatic);
        atom.bracket = true;
        atom.isotope = isotope;

        if self.peek() == Some('@') {
            self.pos += 1;
            atom.chirality = if self.peek() == Some('@') {
                self.pos += 1;
                Chirality::TetrahedralCw
            } else if matches!(self.peek(), Some(c) if c.is_ascii_uppercase() && c != 'H') {
                // @TH1, @SP2, @OH12 ...
                while matches!(self.peek(), Some(c) if c.is_ascii_uppercase() && c != 'H') {
                    self.pos += 1;
                }
                self.number();
                Chirality::Other
            } else {
                Chirality::TetrahedralCcw
            };
        }

        if self.peek() == Some('H') {
            self.pos += 1;
            let start = self.pos;
            atom.explicit_hydrogens = match self.bounded_number()? {
                Some(n) => u8::try_from(n)
                    .map_err(|_| SmilesError::new(start, "hydrogen count out of range"))?,
                None => 1,
            };
        }

        let mut charge = 0i32;
        while let Some(sign @ ('+' | '-')) = self.peek() {
            let start = self.pos;
            self.pos += 1;
            let unit = if sign == '+' { 1 } else { -1 };
            let magnitude = self.bounded_number()?.unwrap_or(1) as i32;
            charge = charge
                .checked_add(unit * magnitude)
                .filter(|c| i8::try_from(*c).is_ok())
                .ok_or_else(|| SmilesError::new(start, "charge out of range"))?;
        }
        atom.formal_charge = charge as i8;

        if self.peek() == Some(':') {
            self.pos += 1;
            self.number()
                .ok_or_else(|| self.error("expected atom class after ':'"))?;
        }

        match self.peek() {
            Some(']') => {
                self.pos += 1;
                Ok(atom)
            }
            _ => Err(SmilesError::new(open, "unterminated bracket atom")),
        }
    }

    fn push_atom(&mut self, atom: Atom) -> Result<(), SmilesError> {
        let idx = self.atoms.len();
        self.atoms.push(atom);
        self.adjacency.push(Vec::new());
        if let Some(prev) = self.current {
            let symbol = self.pending.take().map(|(s, _)| s);
            self.add_bond(prev, idx, symbol)?;
        }
        self.current = Some(idx);
        Ok(())
    }

    fn ring_bond(&mut self, number: u32, position: usize) -> Result<(), SmilesError> {
        let current = self
            .current
            .ok_or_else(|| SmilesError::new(position, "ring bond has no preceding atom"))?;
        let symbol = self.pending.take().map(|(s, _)| s);
        match self.rings.remove(&number) {
            Some(open) => {
                let symbol = match (open.symbol, symbol) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(SmilesError::new(
                            position,
                            format!("conflicting bond symbols for ring bond {number}"),
                        ))
                    }
                    (a, b) => a.or(b),
                };
                self.add_bond(open.atom, current, symbol)
                    .map_err(|e| SmilesError::new(position, e.reason))
            }
            None => {
                self.rings.insert(
                    number,
                    RingOpen {
                        atom: current,
                        symbol,
                        position,
                    },
                );
                Ok(())
            }
        }
    }

    fn add_bond(
        &mut self,
        a: usize,
        b: usize,
        symbol: Option<BondSymbol>,
    ) -> Result<(), SmilesError> {
        if a == b {
            return Err(self.error("ring bond to the same atom"));
        }
        if self.adjacency[a].iter().any(|&(n, _)| n == b) {
            return Err(self.error(format!("duplicate bond between atoms {a} and {b}")));
        }
        let bond_type = match symbol {
            Some(BondSymbol::Single | BondSymbol::Up | BondSymbol::Down) => BondType::Single,
            Some(BondSymbol::Double) => BondType::Double,
            Some(BondSymbol::Triple) => BondType::Triple,
            Some(BondSymbol::Aromatic) => BondType::Aromatic,
            None if self.atoms[a].aromatic && self.atoms[b].aromatic => BondType::Aromatic,
            None => BondType::Single,
        };
        if let Some(dir @ (BondSymbol::Up | BondSymbol::Down)) = symbol {
            self.directional.push(DirectionalBond {
                from: a,
                to: b,
                up: dir == BondSymbol::Up,
            });
        }
        let bond_idx = self.bonds.len();
        self.bonds.push(Bond {
            begin: a,
            end: b,
            bond_type,
            stereo: BondStereo::None,
            in_ring: false,
            conjugated: false,
        });
        self.adjacency[a].push((b, bond_idx));
        self.adjacency[b].push((a, bond_idx));
        Ok(())
    }
}

fn capitalize(symbol: &str) -> String {
    let mut chars = symbol.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

// Perception ----------------------------------------------------------------

/// Marks ring bonds (every bond that is not a bridge) and ring atoms.
fn perceive_rings(mol: &mut Molecule) {
    let n = mol.atoms.len();
    let mut disc = vec![usize::MAX; n];
    let mut low = vec![0usize; n];
    let mut is_bridge = vec![false; mol.bonds.len()];
    let mut timer = 0;

    fn visit(
        u: usize,
        parent_bond: Option<usize>,
        adjacency: &[Vec<(usize, usize)>],
        disc: &mut [usize],
        low: &mut [usize],
        is_bridge: &mut [bool],
        timer: &mut usize,
    ) {
        disc[u] = *timer;
        low[u] = *timer;
        *timer += 1;
        for &(v, bond) in &adjacency[u] {
            if Some(bond) == parent_bond {
                continue;
            }
            if disc[v] == usize::MAX {
                visit(v, Some(bond), adjacency, disc, low, is_bridge, timer);
                low[u] = low[u].min(low[v]);
                if low[v] > disc[u] {
                    is_bridge[bond] = true;
                }
            } else {
                low[u] = low[u].min(disc[v]);
            }
        }
    }

    for start in 0..n {
        if disc[start] == usize::MAX {
            visit(
                start,
                None,
                &mol.adjacency,
                &mut disc,
                &mut low,
                &mut is_bridge,
                &mut timer,
            );
        }
    }

    for (idx, bond) in mol.bonds.iter_mut().enumerate() {
        bond.in_ring = !is_bridge[idx];
        if bond.in_ring {
            mol.atoms[bond.begin].in_ring = true;
            mol.atoms[bond.end].in_ring = true;
        }
    }
}

/// Bond-order sum used for valence bookkeeping. Aromatic bonds count as one,
/// plus a single shared pi electron for aromatic atoms that donate one
/// (everything except the lone-pair donors `o`, `s`, `se`, `te`).
fn valence_sum(mol: &Molecule, atom: usize) -> u32 {
    let mut sum = 0u32;
    let mut aromatic_bonds = 0u32;
    for &(_, bond) in &mol.adjacency[atom] {
        sum += match mol.bonds[bond].bond_type {
            BondType::Single => 1,
            BondType::Double => 2,
            BondType::Triple => 3,
            BondType::Aromatic => {
                aromatic_bonds += 1;
                1
            }
        };
    }
    let a = &mol.atoms[atom];
    if a.aromatic && aromatic_bonds > 0 && !matches!(a.atomic_number, 8 | 16 | 34 | 52) {
        sum += 1;
    }
    sum
}

fn assign_hydrogens(mol: &mut Molecule) -> Result<(), SmilesError> {
    for idx in 0..mol.atoms.len() {
        let sum = valence_sum(mol, idx);
        let atom = &mol.atoms[idx];
        let valences = element::default_valences(atom.atomic_number);

        if !atom.bracket {
            if atom.atomic_number == 0 {
                continue;
            }
            let implicit = match valences.iter().find(|&&v| u32::from(v) >= sum) {
                Some(&v) => v - sum as u8,
                None if atom.aromatic => 0,
                None => {
                    return Err(SmilesError::new(
                        0,
                        format!(
                            "explicit valence {sum} for atom {idx} ({}) is greater than permitted",
                            atom.symbol()
                        ),
                    ))
                }
            };
            mol.atoms[idx].implicit_hydrogens = implicit;
        } else if atom.formal_charge == 0
            && !atom.aromatic
            && element::is_organic_subset(atom.atomic_number)
        {
            let total = sum + u32::from(atom.explicit_hydrogens);
            let max = valences.iter().copied().max().map(u32::from).unwrap_or_default();
            if total > max {
                return Err(SmilesError::new(
                    0,
                    format!(
                        "explicit valence {total} for atom {idx} ({}) is greater than permitted",
                        atom.symbol()
                    ),
                ));
            }
            let smallest = valences[0];
            if total < u32::from(smallest) {
                mol.atoms[idx].radical_electrons = smallest - total as u8;
            }
        }
    }
    Ok(())
}

fn assign_hybridization(mol: &mut Molecule) {
    for idx in 0..mol.atoms.len() {
        let atom = &mol.atoms[idx];
        let degree = mol.adjacency[idx].len();
        let (mut doubles, mut triples) = (0, 0);
        for &(_, bond) in &mol.adjacency[idx] {
            match mol.bonds[bond].bond_type {
                BondType::Double => doubles += 1,
                BondType::Triple => triples += 1,
                _ => {}
            }
        }
        let coordination = degree + atom.total_hydrogens() as usize;
        let hybridization = if atom.atomic_number <= 1 || coordination == 0 {
            Hybridization::Other
        } else if atom.aromatic {
            Hybridization::Sp2
        } else if triples > 0 || doubles > 1 {
            Hybridization::Sp
        } else if doubles == 1 {
            Hybridization::Sp2
        } else {
            match coordination {
                5 => Hybridization::Sp3d,
                6 => Hybridization::Sp3d2,
                _ => Hybridization::Sp3,
            }
        };
        mol.atoms[idx].hybridization = hybridization;
    }
}

fn assign_conjugation(mol: &mut Molecule) {
    let has_multiple = |mol: &Molecule, atom: usize, except: usize| {
        mol.adjacency[atom]
            .iter()
            .any(|&(_, b)| b != except && mol.bonds[b].bond_type.is_multiple())
    };
    // lone-pair donors next to a pi system (amides, esters, enamines)
    let is_donor = |mol: &Molecule, atom: usize| {
        let a = &mol.atoms[atom];
        matches!(a.atomic_number, 7 | 8 | 16)
            && !a.aromatic
            && mol.adjacency[atom]
                .iter()
                .all(|&(_, b)| mol.bonds[b].bond_type == BondType::Single)
    };

    let mut conjugated = vec![false; mol.bonds.len()];
    for (idx, bond) in mol.bonds.iter().enumerate() {
        if bond.bond_type == BondType::Aromatic {
            conjugated[idx] = true;
        } else if bond.bond_type == BondType::Single {
            let (a, b) = (bond.begin, bond.end);
            let pi_a = has_multiple(mol, a, idx);
            let pi_b = has_multiple(mol, b, idx);
            conjugated[idx] = (pi_a && pi_b)
                || (pi_a && is_donor(mol, b))
                || (pi_b && is_donor(mol, a));
        }
    }
    for (idx, bond) in mol.bonds.iter().enumerate() {
        if matches!(bond.bond_type, BondType::Double | BondType::Triple) {
            conjugated[idx] = [bond.begin, bond.end].iter().any(|&atom| {
                mol.adjacency[atom]
                    .iter()
                    .any(|&(_, b)| b != idx && conjugated[b])
            });
        }
    }
    for (bond, flag) in mol.bonds.iter_mut().zip(conjugated) {
        bond.conjugated = flag;
    }
}

/// Normalized direction of the first `/` `\` bond on one side of a double
/// bond, read as neighbour->center on the left and center->neighbour on the
/// right. Equal directions on both sides mean the substituents are trans.
fn side_direction(
    directional: &[DirectionalBond],
    center: usize,
    partner: usize,
    left: bool,
) -> Option<bool> {
    directional.iter().find_map(|d| {
        if d.to == center && d.from != partner {
            Some(if left { d.up } else { !d.up })
        } else if d.from == center && d.to != partner {
            Some(if left { !d.up } else { d.up })
        } else {
            None
        }
    })
}

fn assign_stereo(mol: &mut Molecule, directional: &[DirectionalBond]) {
    if directional.is_empty() {
        return;
    }
    for bond in mol.bonds.iter_mut() {
        if bond.bond_type != BondType::Double {
            continue;
        }
        if let (Some(l), Some(r)) = (
            side_direction(directional, bond.begin, bond.end, true),
            side_direction(directional, bond.end, bond.begin, false),
        ) {
            bond.stereo = if l == r { BondStereo::E } else { BondStereo::Z };
        }
    }
}
