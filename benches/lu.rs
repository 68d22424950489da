use criterion::{criterion_group, criterion_main, Criterion};
use rand::random;

use dmat::{
    lu::partial_pivoting, BlockCtrl, Dist, DistMatrix, DistSpec, Grid, Mat, PanelVariant,
    Universe,
};

pub fn lu(c: &mut Criterion) {
    let spec = DistSpec::new(Dist::Mc, Dist::Mr);

    for n in [64, 128, 256, 512] {
        let mat = Mat::with_dims(|_, _| random::<f64>(), n, n);

        for (h, w) in [(1, 1), (2, 2), (1, 4)] {
            for variant in [PanelVariant::Distributed, PanelVariant::Replicated] {
                let name = match variant {
                    PanelVariant::Distributed => "dist",
                    PanelVariant::Replicated => "repl",
                };
                c.bench_function(&format!("dmat-plu-{name}-{h}x{w}-{n}"), |b| {
                    b.iter(|| {
                        Universe::run(h * w, |comm| {
                            let grid = Grid::new(&comm, h, w).unwrap();
                            let ctrl = BlockCtrl::for_grid(&grid).with_variant(variant);
                            let mut lu = DistMatrix::from_local(&mat, &grid, spec).unwrap();
                            partial_pivoting::compute::lu_in_place(lu.as_mut(), &ctrl).unwrap();
                        })
                    })
                });
            }
        }
    }
}

criterion_group!(benches, lu);
criterion_main!(benches);
