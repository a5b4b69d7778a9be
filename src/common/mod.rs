//! Shared primitives: bitmaps, dictionaries, alphabets, dates, Umbra
//! strings, lineage and phylogenetic trees.

pub mod bitmap;
pub mod date;
pub mod dictionary;
pub mod lineage;
pub mod pattern;
pub mod phylo;
pub mod symbols;
pub mod umbra;

pub use bitmap::{complement, fast_union, CopyOnWriteBitmap};
pub use date::Date;
pub use dictionary::{Dictionary, Idx};
pub use lineage::{LineageTree, LineageTreeAndIdMap, RecombinantFollowingMode};
pub use pattern::SearchPattern;
pub use phylo::PhyloTree;
pub use symbols::{AaSymbol, Alphabet, AlphabetKind, AminoAcid, NucSymbol, Nucleotide};
pub use umbra::{UmbraString, VariableDataRegistry};
