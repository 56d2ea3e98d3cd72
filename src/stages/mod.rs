pub mod stage0_segment;
pub mod stage1_extract;
pub mod stage1_llm_annotate;
pub mod stage2_cluster;
pub mod stage3_disambiguate;
pub mod stage4_redact;
pub mod stage5_cite;
pub mod stage6_tag;
pub mod stage7_export;

pub use stage0_segment::*;
pub use stage1_extract::*;
pub use stage1_llm_annotate::*;
pub use stage2_cluster::*;
pub use stage3_disambiguate::*;
pub use stage4_redact::*;
pub use stage5_cite::*;
pub use stage6_tag::*;
pub use stage7_export::*;
