//! 依赖图构建和拓扑排序
//!
//! 分析 Pass 之间的资源依赖关系，构建 DAG 并进行拓扑排序。

use std::collections::{BTreeSet, HashMap};

/// 依赖边：从 producer 到 consumer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgDependencyEdge {
    /// 生产者 Pass 索引
    pub producer: usize,
    /// 消费者 Pass 索引
    pub consumer: usize,
    /// 产生依赖的资源
    pub resource: String,
}

/// 依赖图
///
/// 表示 Pass 之间的依赖关系，用于拓扑排序和执行顺序计算。
pub struct RgDependencyGraph {
    /// 前驱表：pass_index -> 必须先于它执行的 Pass（升序）
    predecessors: Vec<BTreeSet<usize>>,
    /// 所有边
    edges: Vec<RgDependencyEdge>,
}

impl RgDependencyGraph {
    pub fn new(pass_count: usize) -> Self {
        Self {
            predecessors: vec![BTreeSet::new(); pass_count],
            edges: Vec::new(),
        }
    }

    /// 添加依赖边，自环会被忽略
    pub fn add_edge(&mut self, producer: usize, consumer: usize, resource: &str) {
        if producer == consumer {
            return;
        }
        if self.predecessors[consumer].insert(producer) {
            self.edges.push(RgDependencyEdge {
                producer,
                consumer,
                resource: resource.to_string(),
            });
        }
    }

    /// 从每个 Pass 的读写声明构建依赖图
    ///
    /// 规则：
    /// - 读：依赖声明在它之前的最后一个写入者；没有的话，依赖声明在它之后的最后一个写入者
    /// - 写后写（WAW）：同一资源相邻的两个写入者之间有依赖
    pub fn build<S: AsRef<str>>(reads: &[Vec<S>], writes: &[Vec<S>]) -> Self {
        let pass_count = reads.len().max(writes.len());
        let mut graph = Self::new(pass_count);

        // 每个资源的写入者，按声明顺序
        let mut writers: HashMap<&str, Vec<usize>> = HashMap::new();
        for (pass_idx, pass_writes) in writes.iter().enumerate() {
            for name in pass_writes {
                let list = writers.entry(name.as_ref()).or_default();
                if list.last() != Some(&pass_idx) {
                    list.push(pass_idx);
                }
            }
        }

        for (name, list) in &writers {
            for pair in list.windows(2) {
                graph.add_edge(pair[0], pair[1], name);
            }
        }

        for (pass_idx, pass_reads) in reads.iter().enumerate() {
            for name in pass_reads {
                let name = name.as_ref();
                let Some(list) = writers.get(name) else {
                    continue;
                };
                let producer = list
                    .iter()
                    .rev()
                    .find(|&&writer| writer < pass_idx)
                    .or_else(|| list.iter().rev().find(|&&writer| writer > pass_idx));
                if let Some(&producer) = producer {
                    graph.add_edge(producer, pass_idx, name);
                }
            }
        }

        graph
    }

    /// 深度优先的拓扑排序
    ///
    /// 按声明顺序遍历 Pass，前驱按索引升序访问，后序输出，
    /// 因此相互独立的 Pass 保持声明顺序。
    ///
    /// # 返回
    /// - `Ok(order)`: 拓扑排序后的 Pass 索引列表
    /// - `Err(cycle)`: 检测到循环依赖，返回环上的 Pass 索引（首尾相同）
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let pass_count = self.predecessors.len();
        let mut marks = vec![Mark::Unvisited; pass_count];
        let mut order = Vec::with_capacity(pass_count);
        // (pass, 下一个要访问的前驱)
        let mut stack: Vec<(usize, std::collections::btree_set::Iter<'_, usize>)> = Vec::new();

        for root in 0..pass_count {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::OnStack;
            stack.push((root, self.predecessors[root].iter()));

            while let Some((pass, preds)) = stack.last_mut() {
                let pass = *pass;
                match preds.next() {
                    Some(&pred) => match marks[pred] {
                        Mark::Done => {}
                        Mark::OnStack => {
                            let start = stack.iter().position(|(p, _)| *p == pred).unwrap_or(0);
                            let mut cycle = stack[start..].iter().map(|(p, _)| *p).collect::<Vec<_>>();
                            cycle.push(pred);
                            return Err(cycle);
                        }
                        Mark::Unvisited => {
                            marks[pred] = Mark::OnStack;
                            stack.push((pred, self.predecessors[pred].iter()));
                        }
                    },
                    None => {
                        marks[pass] = Mark::Done;
                        order.push(pass);
                        stack.pop();
                    }
                }
            }
        }

        Ok(order)
    }

    /// 获取 Pass 的直接依赖（前驱）
    #[inline]
    pub fn predecessors(&self, pass_index: usize) -> impl Iterator<Item = usize> + '_ {
        self.predecessors[pass_index].iter().copied()
    }

    /// 获取所有边
    #[inline]
    pub fn edges(&self) -> &[RgDependencyEdge] {
        &self.edges
    }
}
