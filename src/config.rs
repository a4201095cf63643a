//! Tunable retrieval controls shared by the pipeline and the server binary.

/// Knobs bounding the hybrid retrieval pipeline for one deployment.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchControls {
    /// Hits kept from the lexical engine.
    pub text_k: usize,
    /// Hits kept from the vector engine.
    pub vec_k: usize,
    /// ANN candidate pool size before the top-k cut.
    pub num_candidates: usize,
    /// Fused chunks retained for section grouping.
    pub max_chunks: usize,
    /// Dampening constant from the RRF paper.
    pub rrf_k: f64,
    /// Weight of lexical ranks in the fused score.
    pub text_weight: f64,
    /// Weight of vector ranks in the fused score.
    pub vector_weight: f64,
    /// Bounded capacity of the output passage stream.
    pub stream_buffer: usize,
}

impl Default for SearchControls {
    fn default() -> Self {
        Self {
            text_k: 30,
            vec_k: 30,
            num_candidates: 100,
            max_chunks: 30,
            rrf_k: 60.0,
            text_weight: 1.0,
            vector_weight: 1.0,
            stream_buffer: 20,
        }
    }
}
