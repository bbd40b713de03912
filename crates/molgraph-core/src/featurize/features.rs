use crate::smiles::{Atom, Bond, BondStereo, BondType, Chirality, Hybridization};

/// Number of integer columns in a node feature row.
pub const ATOM_FEATURES: usize = 9;
/// Number of integer columns in an edge feature row.
pub const BOND_FEATURES: usize = 3;

const MAX_ATOMIC_NUM: usize = 118;
const MAX_DEGREE: usize = 10;
const MIN_CHARGE: i32 = -5;
const MAX_CHARGE: i32 = 5;
const MAX_HS: usize = 8;
const MAX_RADICALS: usize = 4;

/// Vocabulary sizes of the node feature columns, misc slot included.
pub fn get_atom_feature_dims() -> Vec<usize> {
    vec![
        MAX_ATOMIC_NUM + 1,
        5,
        MAX_DEGREE + 2,
        (MAX_CHARGE - MIN_CHARGE) as usize + 2,
        MAX_HS + 2,
        MAX_RADICALS + 2,
        6,
        2,
        2,
    ]
}

/// Vocabulary sizes of the edge feature columns.
pub fn get_bond_feature_dims() -> Vec<usize> {
    vec![5, 6, 2]
}

/// Index of `value` in `0..=max`, or the misc slot `max + 1`.
fn bounded(value: usize, max: usize) -> u32 {
    value.min(max + 1) as u32
}

fn atomic_num_index(atomic_number: u8) -> u32 {
    match atomic_number as usize {
        0 => MAX_ATOMIC_NUM as u32,
        n if n <= MAX_ATOMIC_NUM => n as u32 - 1,
        _ => MAX_ATOMIC_NUM as u32,
    }
}

#[rustfmt::skip]
fn chirality_index(chirality: Chirality) -> u32 {
    match chirality {
        Chirality::Unspecified   => 0,
        Chirality::TetrahedralCw  => 1,
        Chirality::TetrahedralCcw => 2,
        Chirality::Other         => 3,
    }
}

fn charge_index(charge: i8) -> u32 {
    let charge = charge as i32;
    if (MIN_CHARGE..=MAX_CHARGE).contains(&charge) {
        (charge - MIN_CHARGE) as u32
    } else {
        (MAX_CHARGE - MIN_CHARGE) as u32 + 1
    }
}

#[rustfmt::skip]
fn hybridization_index(hybridization: Hybridization) -> u32 {
    match hybridization {
        Hybridization::Sp    => 0,
        Hybridization::Sp2   => 1,
        Hybridization::Sp3   => 2,
        Hybridization::Sp3d  => 3,
        Hybridization::Sp3d2 => 4,
        Hybridization::Other => 5,
    }
}

#[rustfmt::skip]
fn bond_type_index(bond_type: BondType) -> u32 {
    match bond_type {
        BondType::Single   => 0,
        BondType::Double   => 1,
        BondType::Triple   => 2,
        BondType::Aromatic => 3,
    }
}

// STEREONONE, STEREOZ, STEREOE, STEREOCIS, STEREOTRANS, STEREOANY
#[rustfmt::skip]
fn stereo_index(stereo: BondStereo) -> u32 {
    match stereo {
        BondStereo::None => 0,
        BondStereo::Z    => 1,
        BondStereo::E    => 2,
    }
}

pub(crate) fn atom_to_feature_vector(atom: &Atom, degree: usize) -> [u32; ATOM_FEATURES] {
    [
        atomic_num_index(atom.atomic_number),
        chirality_index(atom.chirality),
        bounded(degree, MAX_DEGREE),
        charge_index(atom.formal_charge),
        bounded(atom.total_hydrogens() as usize, MAX_HS),
        bounded(atom.radical_electrons as usize, MAX_RADICALS),
        hybridization_index(atom.hybridization),
        atom.aromatic as u32,
        atom.in_ring as u32,
    ]
}

pub(crate) fn bond_to_feature_vector(bond: &Bond) -> [u32; BOND_FEATURES] {
    [
        bond_type_index(bond.bond_type),
        stereo_index(bond.stereo),
        bond.conjugated as u32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_dims() {
        assert_eq!(get_atom_feature_dims(), vec![119, 5, 12, 12, 10, 6, 6, 2, 2]);
        assert_eq!(get_bond_feature_dims(), vec![5, 6, 2]);
        assert_eq!(get_atom_feature_dims().len(), ATOM_FEATURES);
    }

    #[test]
    fn test_misc_slots() {
        assert_eq!(atomic_num_index(6), 5);
        assert_eq!(atomic_num_index(0), 118);
        assert_eq!(charge_index(0), 5);
        assert_eq!(charge_index(-5), 0);
        assert_eq!(charge_index(7), 11);
        assert_eq!(bounded(3, MAX_DEGREE), 3);
        assert_eq!(bounded(14, MAX_DEGREE), 11);
        assert_eq!(bounded(12, MAX_HS), 9);
    }
}
